use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    entities::order::PaymentStatus,
    errors::ServiceError,
    payments::{ProviderEvent, ProviderPaymentStatus},
    services::orders::OrderService,
    services::settlement::{SettlementService, SettlementTrigger},
};

/// What the reconciler did with an inbound provider event. Every
/// variant is acknowledged to the provider; `Ignored` means zero writes
/// were performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The event advanced (or re-confirmed) an order's payment state.
    Processed,
    /// The event could not be correlated to an order, or carried a state
    /// this core does not act on. Nothing was written.
    Ignored,
}

/// Payment webhook reconciler. Maps normalized provider events onto the
/// order payment state machine and triggers settlement; all provider
/// adapters feed this single component.
#[derive(Clone)]
pub struct WebhookReconciler {
    orders: Arc<OrderService>,
    settlement: Arc<SettlementService>,
}

impl WebhookReconciler {
    pub fn new(orders: Arc<OrderService>, settlement: Arc<SettlementService>) -> Self {
        Self { orders, settlement }
    }

    /// Process one inbound provider event. Unresolvable references are
    /// acknowledged without error: the order may not exist yet under
    /// eventual consistency, or the event concerns an unrelated resource.
    #[instrument(skip(self, event), fields(provider = %event.provider, payment_id = %event.provider_payment_id))]
    pub async fn process_event(
        &self,
        event: ProviderEvent,
    ) -> Result<ReconcileOutcome, ServiceError> {
        // Correlation: explicit order metadata first, stored provider
        // payment id as the fallback
        let mut order = None;
        if let Some(order_id) = event.order_ref {
            order = self.orders.get_order(order_id).await?;
        }
        if order.is_none() {
            order = self
                .orders
                .find_by_payment_intent(&event.provider_payment_id)
                .await?;
        }

        let Some(order) = order else {
            info!(
                provider = %event.provider,
                payment_id = %event.provider_payment_id,
                "webhook references no known order; acknowledging without action"
            );
            return Ok(ReconcileOutcome::Ignored);
        };

        match event.status {
            ProviderPaymentStatus::Succeeded => {
                self.settlement
                    .settle(order.id, SettlementTrigger::PaymentConfirmed)
                    .await?;
                Ok(ReconcileOutcome::Processed)
            }
            ProviderPaymentStatus::Pending => {
                // Re-notification while the provider processes; keep the
                // payment id for traceability, no settlement
                self.orders
                    .mark_payment_pending(order.id, &event.provider_payment_id)
                    .await?;
                Ok(ReconcileOutcome::Processed)
            }
            ProviderPaymentStatus::Failed
            | ProviderPaymentStatus::Cancelled
            | ProviderPaymentStatus::Refunded => {
                let to = match event.status {
                    ProviderPaymentStatus::Cancelled => PaymentStatus::Cancelled,
                    ProviderPaymentStatus::Refunded => PaymentStatus::Refunded,
                    _ => PaymentStatus::Failed,
                };
                let transitioned = self.orders.transition_payment_failed(order.id, to).await?;
                if !transitioned {
                    // Already terminal (paid, or failed by an earlier
                    // delivery); the fulfillment status stays untouched
                    warn!(
                        order_id = %order.id,
                        intended = ?to,
                        "failure event arrived for a non-pending payment; no transition applied"
                    );
                    return Ok(ReconcileOutcome::Ignored);
                }
                Ok(ReconcileOutcome::Processed)
            }
        }
    }
}
