use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order_item,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// A (color, size) stock-keeping unit of a product. The variants JSON
/// stored on the product row is validated into this shape at the ledger
/// boundary; malformed payloads are rejected, not trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub color: String,
    pub size: String,
    pub stock: i32,
}

/// One requested line against the ledger
#[derive(Debug, Clone)]
pub struct StockLine {
    pub product_id: Uuid,
    pub color: String,
    pub size: String,
    pub quantity: i32,
}

/// Result of one applied settlement decrement
#[derive(Debug, Clone)]
pub struct AppliedDecrement {
    pub product_id: Uuid,
    pub color: String,
    pub size: String,
    pub decremented: i32,
    pub remaining: i32,
}

/// One line that could not be applied during settlement
#[derive(Debug, Clone)]
pub struct FailedDecrement {
    pub product_id: Uuid,
    pub color: String,
    pub size: String,
    pub quantity: i32,
    pub reason: String,
}

/// Per-item outcome of a settlement decrement pass
#[derive(Debug, Default)]
pub struct DecrementReport {
    pub applied: Vec<AppliedDecrement>,
    pub failed: Vec<FailedDecrement>,
}

/// Parse and validate a product's variants JSON.
pub fn parse_variants(
    product_id: Uuid,
    value: &serde_json::Value,
) -> Result<Vec<Variant>, ServiceError> {
    let variants: Vec<Variant> = serde_json::from_value(value.clone()).map_err(|e| {
        ServiceError::ValidationError(format!(
            "product {} has a malformed variants payload: {}",
            product_id, e
        ))
    })?;

    for variant in &variants {
        if variant.color.trim().is_empty() || variant.size.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "product {} has a variant with empty color or size",
                product_id
            )));
        }
        if variant.stock < 0 {
            return Err(ServiceError::ValidationError(format!(
                "product {} variant {}/{} has negative stock {}",
                product_id, variant.color, variant.size, variant.stock
            )));
        }
    }

    Ok(variants)
}

/// Stock ledger over the products table. The checkout-time availability
/// check is advisory; the floor-at-zero decrement at settlement is the
/// only authority on stock.
#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Advisory availability check for a cart. Fails the whole cart with
    /// `OutOfStock` when any line references a missing variant or asks
    /// for more than the current count. Races with concurrent buyers are
    /// accepted; settlement floors at zero either way.
    #[instrument(skip(self, lines))]
    pub async fn check_availability(&self, lines: &[StockLine]) -> Result<(), ServiceError> {
        let mut product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        product_ids.sort_unstable();
        product_ids.dedup();

        let products = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&*self.db)
            .await?;
        let by_id: HashMap<Uuid, &product::Model> =
            products.iter().map(|p| (p.id, p)).collect();

        for line in lines {
            let product = by_id.get(&line.product_id).ok_or_else(|| {
                ServiceError::OutOfStock(format!(
                    "product {} is no longer available",
                    line.product_id
                ))
            })?;
            if !product.active {
                return Err(ServiceError::OutOfStock(format!(
                    "product {} is no longer available",
                    product.id
                )));
            }

            let variants = parse_variants(product.id, &product.variants)?;
            let variant = variants
                .iter()
                .find(|v| v.color == line.color && v.size == line.size)
                .ok_or_else(|| {
                    ServiceError::OutOfStock(format!(
                        "variant {}/{} of product {} not found",
                        line.color, line.size, product.id
                    ))
                })?;

            if variant.stock < line.quantity {
                return Err(ServiceError::OutOfStock(format!(
                    "variant {}/{} of product {} has {} left, {} requested",
                    line.color, line.size, product.id, variant.stock, line.quantity
                )));
            }
        }

        Ok(())
    }

    /// Settlement decrement for a paid order. Each line is applied
    /// independently inside its own transaction and floors at zero;
    /// a failing line is reported and the others still proceed. Never
    /// fails the settlement over stock counts.
    #[instrument(skip(self, items), fields(order_id = %order_id))]
    pub async fn decrement_for_order(
        &self,
        order_id: Uuid,
        items: &[order_item::Model],
    ) -> Result<DecrementReport, ServiceError> {
        let mut report = DecrementReport::default();

        for item in items {
            match self
                .decrement_variant(
                    item.product_id,
                    &item.selected_color,
                    &item.selected_size,
                    item.quantity,
                )
                .await
            {
                Ok(applied) => report.applied.push(applied),
                Err(err) => {
                    error!(
                        order_id = %order_id,
                        product_id = %item.product_id,
                        color = %item.selected_color,
                        size = %item.selected_size,
                        error = %err,
                        "stock decrement failed for order line"
                    );
                    report.failed.push(FailedDecrement {
                        product_id: item.product_id,
                        color: item.selected_color.clone(),
                        size: item.selected_size.clone(),
                        quantity: item.quantity,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Decrement one variant's stock, floored at zero.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn decrement_variant(
        &self,
        product_id: Uuid,
        color: &str,
        size: &str,
        quantity: i32,
    ) -> Result<AppliedDecrement, ServiceError> {
        let applied = self
            .adjust_variant(product_id, color, size, -quantity)
            .await?;

        let _ = self
            .event_sender
            .send(Event::StockDecremented {
                product_id,
                color: color.to_string(),
                size: size.to_string(),
                quantity: applied.decremented,
                remaining: applied.remaining,
            })
            .await;

        Ok(applied)
    }

    /// Add stock back to a variant (manual reconciliation, received goods).
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn restock_variant(
        &self,
        product_id: Uuid,
        color: &str,
        size: &str,
        quantity: i32,
    ) -> Result<AppliedDecrement, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidInput(
                "restock quantity must be positive".to_string(),
            ));
        }
        self.adjust_variant(product_id, color, size, quantity).await
    }

    /// Apply a signed stock adjustment inside a per-product transaction.
    /// Negative deltas floor at zero rather than erroring.
    async fn adjust_variant(
        &self,
        product_id: Uuid,
        color: &str,
        size: &str,
        delta: i32,
    ) -> Result<AppliedDecrement, ServiceError> {
        let txn = self.db.begin().await?;

        // Serialize concurrent adjustments on the row where the backend
        // supports it; SQLite serializes write transactions on its own.
        let mut query = ProductEntity::find_by_id(product_id);
        if txn.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }
        let product = query.one(&txn).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("product {} not found", product_id))
        })?;

        let mut variants = parse_variants(product.id, &product.variants)?;
        let variant = variants
            .iter_mut()
            .find(|v| v.color == color && v.size == size)
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "variant {}/{} of product {} not found",
                    color, size, product_id
                ))
            })?;

        let previous = variant.stock;
        let applied_delta = if delta < 0 {
            let requested = -delta;
            if previous < requested {
                warn!(
                    product_id = %product_id,
                    color = %color,
                    size = %size,
                    requested = requested,
                    available = previous,
                    "stock decrement floored at zero"
                );
                let _ = self
                    .event_sender
                    .send(Event::StockDepleted {
                        product_id,
                        color: color.to_string(),
                        size: size.to_string(),
                        requested,
                        available: previous,
                    })
                    .await;
            }
            -(previous.min(requested))
        } else {
            delta
        };
        variant.stock = previous + applied_delta;
        let remaining = variant.stock;

        let mut update: product::ActiveModel = product.into();
        update.variants = Set(serde_json::to_value(&variants)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?);
        update.updated_at = Set(Some(chrono::Utc::now()));
        update.update(&txn).await?;

        txn.commit().await?;

        info!(
            product_id = %product_id,
            color = %color,
            size = %size,
            delta = applied_delta,
            remaining = remaining,
            "variant stock adjusted"
        );

        Ok(AppliedDecrement {
            product_id,
            color: color.to_string(),
            size: size.to_string(),
            decremented: -applied_delta.min(0),
            remaining,
        })
    }

    /// Current stock for a variant; used by availability displays.
    pub async fn variant_stock(
        &self,
        product_id: Uuid,
        color: &str,
        size: &str,
    ) -> Result<Option<i32>, ServiceError> {
        let Some(product) = ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };
        let variants = parse_variants(product.id, &product.variants)?;
        Ok(variants
            .iter()
            .find(|v| v.color == color && v.size == size)
            .map(|v| v.stock))
    }
}
