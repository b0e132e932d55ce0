use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order::{self, DeliveryType, OrderStatus, PaymentMethod, PaymentStatus},
    entities::order_item,
    errors::ServiceError,
    notifications::{best_effort, Notifier as _, StatusUpdate},
    ApiResponse, AppState, ListQuery,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    pub selected_color: String,
    pub selected_size: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    #[schema(value_type = String)]
    pub delivery_type: DeliveryType,
    pub delivery_days: i32,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
    #[schema(value_type = String)]
    pub discount_amount: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub coupon_code: Option<String>,
    #[schema(value_type = String)]
    pub payment_method: PaymentMethod,
    #[schema(value_type = String)]
    pub payment_status: PaymentStatus,
    #[schema(value_type = String)]
    pub status: OrderStatus,
    pub tracking_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    #[schema(value_type = String, example = "shipped")]
    pub status: OrderStatus,
    /// Carrier tracking code passed through to the customer notification
    pub shipping_tracking_code: Option<String>,
}

fn map_order(order: &order::Model, items: &[order_item::Model]) -> OrderResponse {
    OrderResponse {
        id: order.id,
        order_number: order.order_number.clone(),
        customer_name: order.customer_name.clone(),
        customer_email: order.customer_email.clone(),
        delivery_type: order.delivery_type,
        delivery_days: order.delivery_days,
        subtotal: order.subtotal,
        shipping_cost: order.shipping_cost,
        discount_amount: order.discount_amount,
        total: order.total,
        coupon_code: order.coupon_code.clone(),
        payment_method: order.payment_method,
        payment_status: order.payment_status,
        status: order.status,
        tracking_code: order.tracking_code.clone(),
        created_at: order.created_at,
        items: items
            .iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                product_image: item.product_image.clone(),
                selected_color: item.selected_color.clone(),
                selected_size: item.selected_size.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                subtotal: item.subtotal,
            })
            .collect(),
    }
}

/// GET /api/v1/orders/{id}
///
/// Accepts an order id, order number or tracking code; this is what the
/// customer tracking page polls while settlement completes.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = String, Path, description = "Order id, order number or tracking code")),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .resolve_reference(&id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    let items = state.services.orders.get_order_items(order.id).await?;

    Ok(Json(ApiResponse::success(map_order(&order, &items))))
}

/// GET /api/v1/orders
///
/// Paginated listing for the admin back-office, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(
        ("page" = Option<u64>, Query, description = "1-based page number"),
        ("limit" = Option<u64>, Query, description = "Page size")
    ),
    responses(
        (status = 200, description = "Orders page", body = OrderListResponse)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .orders
        .list_orders(query.page, query.limit)
        .await?;

    let mut orders = Vec::with_capacity(page.orders.len());
    for order in &page.orders {
        let items = state.services.orders.get_order_items(order.id).await?;
        orders.push(map_order(order, &items));
    }

    Ok(Json(ApiResponse::success(OrderListResponse {
        orders,
        total: page.total,
        page: page.page,
        per_page: page.per_page,
    })))
}

/// PUT /api/v1/orders/{id}/status
///
/// Admin fulfillment transition; payment status is never touched here.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = String, Path, description = "Order id or order number")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = OrderResponse),
        (status = 400, description = "Invalid transition", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .resolve_reference(&id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;

    let updated = state
        .services
        .orders
        .update_status(order.id, request.status)
        .await?;

    let notification = StatusUpdate {
        order_id: updated.id,
        order_number: updated.order_number.clone(),
        new_status: format!("{:?}", updated.status).to_lowercase(),
        tracking_code: updated.tracking_code.clone(),
        shipping_tracking_code: request.shipping_tracking_code.clone(),
        customer_email: updated.customer_email.clone(),
        whatsapp_number: updated.whatsapp_number.clone(),
    };
    best_effort(
        "status update notification",
        state.services.notifier.send_status_update(&notification),
    )
    .await;

    let items = state.services.orders.get_order_items(updated.id).await?;
    Ok(Json(ApiResponse::success(map_order(&updated, &items))))
}
