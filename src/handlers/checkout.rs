use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::{
    errors::ServiceError,
    services::checkout::{CheckoutRequest, CheckoutResponse},
    ApiResponse, AppState,
};

/// POST /api/v1/checkout
///
/// Validates the cart, persists a pending order and opens a payment
/// session (or settles immediately for in-store pickup).
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Checkout created", body = CheckoutResponse),
        (status = 400, description = "Validation or coupon error", body = crate::errors::ErrorResponse),
        (status = 422, description = "Out of stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.checkout.create_checkout(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}
