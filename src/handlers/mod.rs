pub mod checkout;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod products;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::notifications::Notifier;
use crate::payments::ProcessorRegistry;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<crate::services::orders::OrderService>,
    pub stock: Arc<crate::services::stock::StockService>,
    pub coupons: Arc<crate::services::coupons::CouponService>,
    pub checkout: Arc<crate::services::checkout::CheckoutService>,
    pub settlement: Arc<crate::services::settlement::SettlementService>,
    pub reconciler: Arc<crate::services::reconciliation::WebhookReconciler>,
    pub processors: ProcessorRegistry,
    pub notifier: Arc<dyn Notifier>,
}

impl AppServices {
    /// Wire the full service graph. Every collaborator is passed in
    /// explicitly; nothing is resolved from ambient globals.
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        processors: ProcessorRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let orders = Arc::new(crate::services::orders::OrderService::new(
            db.clone(),
            event_sender.clone(),
        ));
        let stock = Arc::new(crate::services::stock::StockService::new(
            db.clone(),
            event_sender.clone(),
        ));
        let coupons = Arc::new(crate::services::coupons::CouponService::new(db));
        let settlement = Arc::new(crate::services::settlement::SettlementService::new(
            orders.clone(),
            stock.clone(),
            notifier.clone(),
            event_sender.clone(),
        ));
        let reconciler = Arc::new(crate::services::reconciliation::WebhookReconciler::new(
            orders.clone(),
            settlement.clone(),
        ));
        let checkout = Arc::new(crate::services::checkout::CheckoutService::new(
            orders.clone(),
            stock.clone(),
            coupons.clone(),
            processors.clone(),
            settlement.clone(),
            event_sender,
        ));

        Self {
            orders,
            stock,
            coupons,
            checkout,
            settlement,
            reconciler,
            processors,
            notifier,
        }
    }
}

/// The versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(checkout::create_checkout))
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", put(orders::update_order_status))
        .route("/products/:id/restock", post(products::restock_variant))
        .route("/webhooks/stripe", post(payment_webhooks::stripe_webhook))
        .route("/webhooks/pix", post(payment_webhooks::pix_webhook))
}
