use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Boutique API",
        description = "Checkout, payment reconciliation and inventory settlement backend"
    ),
    paths(
        crate::handlers::checkout::create_checkout,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::products::restock_variant,
        crate::handlers::payment_webhooks::stripe_webhook,
        crate::handlers::payment_webhooks::pix_webhook,
    ),
    components(schemas(
        crate::services::checkout::CheckoutRequest,
        crate::services::checkout::CheckoutItem,
        crate::services::checkout::CustomerInfo,
        crate::services::checkout::AddressInput,
        crate::services::checkout::CheckoutResponse,
        crate::handlers::orders::OrderResponse,
        crate::handlers::orders::OrderItemResponse,
        crate::handlers::orders::OrderListResponse,
        crate::handlers::orders::UpdateOrderStatusRequest,
        crate::handlers::products::RestockRequest,
        crate::handlers::products::RestockResponse,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "Checkout", description = "Checkout session initiation"),
        (name = "Orders", description = "Order tracking and admin updates"),
        (name = "Products", description = "Admin stock corrections"),
        (name = "Payments", description = "Payment provider webhooks")
    )
)]
pub struct ApiDoc;

async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Serves the OpenAPI document as JSON.
pub fn openapi_routes() -> Router<AppState> {
    Router::new().route("/api-docs/openapi.json", get(serve_openapi))
}
