use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RestockRequest {
    pub color: String,
    pub size: String,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RestockResponse {
    pub product_id: Uuid,
    pub color: String,
    pub size: String,
    pub stock: i32,
}

/// POST /api/v1/products/{id}/restock
///
/// Admin stock correction: received goods, or manual reconciliation
/// after a partial settlement.
#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/restock",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = RestockRequest,
    responses(
        (status = 200, description = "Stock adjusted", body = RestockResponse),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or variant not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn restock_variant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RestockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let applied = state
        .services
        .stock
        .restock_variant(id, &request.color, &request.size, request.quantity)
        .await?;

    Ok(Json(ApiResponse::success(RestockResponse {
        product_id: applied.product_id,
        color: applied.color,
        size: applied.size,
        stock: applied.remaining,
    })))
}
