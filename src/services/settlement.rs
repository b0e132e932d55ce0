use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    entities::order::PaymentStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{best_effort, Notifier, OrderConfirmation},
    services::orders::OrderService,
    services::stock::StockService,
};

/// What confirmed the order: an asynchronous provider webhook, or a
/// synchronous in-store pickup checkout (which never gates on payment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementTrigger {
    PaymentConfirmed,
    PickupCheckout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// This invocation performed the settlement.
    Settled { tracking_code: String },
    /// The order was already settled; no side effects were performed.
    AlreadySettled,
}

/// Generate a customer-facing tracking code: 8 uppercase alphanumeric
/// characters, collision-resistant enough to share over the phone.
pub fn generate_tracking_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect()
}

/// Settlement orchestrator: confirms payment, decrements stock exactly
/// once per order, assigns the tracking code and fires best-effort
/// notifications. Safe to invoke repeatedly for the same order.
#[derive(Clone)]
pub struct SettlementService {
    orders: Arc<OrderService>,
    stock: Arc<StockService>,
    notifier: Arc<dyn Notifier>,
    event_sender: EventSender,
}

impl SettlementService {
    pub fn new(
        orders: Arc<OrderService>,
        stock: Arc<StockService>,
        notifier: Arc<dyn Notifier>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            stock,
            notifier,
            event_sender,
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id, trigger = ?trigger))]
    pub async fn settle(
        &self,
        order_id: Uuid,
        trigger: SettlementTrigger,
    ) -> Result<SettlementOutcome, ServiceError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        // Idempotency gate: a settled order absorbs duplicate deliveries
        // with zero side effects
        if order.payment_status == PaymentStatus::Paid {
            info!(order_id = %order_id, "order already settled; skipping");
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let tracking_code = order
            .tracking_code
            .clone()
            .unwrap_or_else(generate_tracking_code);

        if trigger == SettlementTrigger::PaymentConfirmed {
            // The conditional update is the authoritative gate; losing the
            // race means another delivery settled first
            let transitioned = self
                .orders
                .transition_payment_paid(order_id, &tracking_code)
                .await?;
            if !transitioned {
                info!(order_id = %order_id, "concurrent settlement won the transition");
                return Ok(SettlementOutcome::AlreadySettled);
            }

            let _ = self
                .event_sender
                .send(Event::PaymentConfirmed {
                    order_id,
                    provider_payment_id: order.payment_intent_id.clone(),
                })
                .await;
        }
        // Pickup orders were created in `processing` with the tracking
        // code already assigned; no payment transition applies.

        let items = self.orders.get_order_items(order_id).await?;
        let report = self.stock.decrement_for_order(order_id, &items).await?;
        if !report.failed.is_empty() {
            // Money is collected but stock is not fully decremented;
            // distinct from both total failure and notification noise
            error!(
                order_id = %order_id,
                failed_lines = report.failed.len(),
                details = ?report.failed,
                "partial settlement: order is paid but some stock decrements failed; manual reconciliation required"
            );
            let _ = self
                .event_sender
                .send(Event::SettlementIncomplete {
                    order_id,
                    failed_lines: report.failed.len(),
                })
                .await;
        }

        let confirmation = OrderConfirmation {
            order_id,
            order_number: order.order_number.clone(),
            tracking_code: tracking_code.clone(),
            customer_name: order.customer_name.clone(),
            customer_email: order.customer_email.clone(),
            whatsapp_number: order.whatsapp_number.clone(),
            total: order.total,
        };
        best_effort(
            "order confirmation",
            self.notifier.send_order_confirmation(&confirmation),
        )
        .await;

        info!(order_id = %order_id, tracking_code = %tracking_code, "order settled");
        Ok(SettlementOutcome::Settled { tracking_code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_code_shape() {
        let code = generate_tracking_code();
        assert_eq!(code.len(), 8);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn tracking_codes_are_distinct() {
        let a = generate_tracking_code();
        let b = generate_tracking_code();
        // 36^8 possibilities; equal codes here would mean a broken RNG
        assert_ne!(a, b);
    }
}
