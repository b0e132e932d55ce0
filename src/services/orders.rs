use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, PaginatorTrait, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    entities::order::{
        self, DeliveryType, Entity as OrderEntity, OrderStatus, PaymentMethod, PaymentStatus,
    },
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Input for creating an order aggregate. All money fields arrive
/// pre-computed by the checkout service.
#[derive(Debug, Clone)]
pub struct CreateOrderInput {
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub whatsapp_number: Option<String>,
    pub delivery_type: DeliveryType,
    pub address_street: Option<String>,
    pub address_number: Option<String>,
    pub address_complement: Option<String>,
    pub address_district: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_zip: Option<String>,
    pub delivery_days: i32,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub tracking_code: Option<String>,
    pub items: Vec<CreateOrderItemInput>,
}

#[derive(Debug, Clone)]
pub struct CreateOrderItemInput {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    pub selected_color: String,
    pub selected_size: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug)]
pub struct OrderListPage {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Order aggregate store. Payment transitions are single conditional
/// updates so duplicate webhook deliveries and admin updates can
/// interleave without read-modify-write races.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates the order and its immutable line items in one transaction.
    #[instrument(skip(self, input), fields(order_number = %input.order_number))]
    pub async fn create_order_with_items(
        &self,
        input: CreateOrderInput,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(input.order_number),
            customer_name: Set(input.customer_name),
            customer_email: Set(input.customer_email),
            customer_phone: Set(input.customer_phone),
            whatsapp_number: Set(input.whatsapp_number),
            delivery_type: Set(input.delivery_type),
            address_street: Set(input.address_street),
            address_number: Set(input.address_number),
            address_complement: Set(input.address_complement),
            address_district: Set(input.address_district),
            address_city: Set(input.address_city),
            address_state: Set(input.address_state),
            address_zip: Set(input.address_zip),
            delivery_days: Set(input.delivery_days),
            subtotal: Set(input.subtotal),
            shipping_cost: Set(input.shipping_cost),
            discount_amount: Set(input.discount_amount),
            total: Set(input.total),
            coupon_code: Set(input.coupon_code),
            payment_method: Set(input.payment_method),
            payment_intent_id: Set(None),
            payment_status: Set(PaymentStatus::Pending),
            status: Set(input.status),
            tracking_code: Set(input.tracking_code),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut item_models = Vec::with_capacity(input.items.len());
        for item in input.items {
            let model = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name),
                product_image: Set(item.product_image),
                selected_color: Set(item.selected_color),
                selected_size: Set(item.selected_size),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                subtotal: Set(item.unit_price * Decimal::from(item.quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            item_models.push(model);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, "Order created");
        let _ = self.event_sender.send(Event::OrderCreated(order_id)).await;

        Ok((order_model, item_models))
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    pub async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_by_tracking_code(
        &self,
        tracking_code: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::TrackingCode.eq(tracking_code))
            .one(&*self.db)
            .await?)
    }

    /// Fallback correlation for webhook events without order metadata.
    pub async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?)
    }

    /// Resolve a customer-supplied reference: order id, order number, or
    /// tracking code, in that order.
    pub async fn resolve_reference(
        &self,
        reference: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        if let Ok(id) = Uuid::parse_str(reference) {
            if let Some(order) = self.get_order(id).await? {
                return Ok(Some(order));
            }
        }
        if let Some(order) = self.find_by_order_number(reference).await? {
            return Ok(Some(order));
        }
        self.find_by_tracking_code(reference).await
    }

    /// Lists orders newest-first with pagination (admin back-office).
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListPage, ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderListPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Records the provider session id right after session creation.
    pub async fn set_payment_intent(
        &self,
        order_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<(), ServiceError> {
        OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentIntentId,
                Expr::value(payment_intent_id.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Records the provider payment id on a pending re-notification
    /// without touching either status. Only fills an absent id; the
    /// unique index keeps it stable afterwards.
    pub async fn mark_payment_pending(
        &self,
        order_id: Uuid,
        provider_payment_id: &str,
    ) -> Result<(), ServiceError> {
        OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentIntentId,
                Expr::value(provider_payment_id.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentIntentId.is_null())
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// The settlement transition: `pending -> paid` exactly once.
    /// A single conditional UPDATE moves payment status, fulfillment
    /// status and tracking code together; zero rows affected means a
    /// concurrent delivery already settled the order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn transition_payment_paid(
        &self,
        order_id: Uuid,
        tracking_code: &str,
    ) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Paid),
            )
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Processing))
            .col_expr(
                order::Column::TrackingCode,
                Expr::value(tracking_code.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Terminal failure transition, only while still pending. The
    /// fulfillment status stays untouched so an operator can tell a dead
    /// order from a cancelled shipment.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn transition_payment_failed(
        &self,
        order_id: Uuid,
        to: PaymentStatus,
    ) -> Result<bool, ServiceError> {
        debug_assert!(matches!(
            to,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded
        ));

        let result = OrderEntity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            let _ = self
                .event_sender
                .send(Event::PaymentFailed {
                    order_id,
                    final_status: to,
                })
                .await;
        }

        Ok(result.rows_affected > 0)
    }

    /// Admin fulfillment transition. Validates the lifecycle edge and
    /// updates conditionally on the observed status so a racing webhook
    /// cannot be clobbered. Never touches payment status.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = self
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot move order from {:?} to {:?}",
                old_status, new_status
            )));
        }

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(old_status))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        let _ = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        self.get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}
