use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::order::{DeliveryType, OrderStatus, PaymentMethod},
    errors::ServiceError,
    events::{Event, EventSender},
    payments::ProcessorRegistry,
    services::coupons::CouponService,
    services::orders::{CreateOrderInput, CreateOrderItemInput, OrderService},
    services::settlement::{
        generate_tracking_code, SettlementOutcome, SettlementService, SettlementTrigger,
    },
    services::stock::{StockLine, StockService},
};

/// One cart line as submitted by the storefront; prices are captured
/// here and snapshotted onto the order items.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutItem {
    pub product_id: Uuid,
    #[validate(length(min = 1, message = "Product name is required"))]
    pub product_name: String,
    pub product_image: Option<String>,
    #[validate(length(min = 1, message = "Color selection is required"))]
    pub selected_color: String,
    #[validate(length(min = 1, message = "Size selection is required"))]
    pub selected_size: String,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[schema(value_type = String, example = "129.90")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CustomerInfo {
    #[validate(length(min = 1, message = "Customer name is required"))]
    pub name: String,
    #[validate(email(message = "Customer email must be valid"))]
    pub email: String,
    #[validate(length(min = 8, message = "Customer phone is required"))]
    pub phone: String,
    pub whatsapp_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddressInput {
    #[validate(length(min = 1, message = "Street is required"))]
    pub street: String,
    #[validate(length(min = 1, message = "Number is required"))]
    pub number: String,
    pub complement: Option<String>,
    #[validate(length(min = 1, message = "District is required"))]
    pub district: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 2, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 8, message = "ZIP code is required"))]
    pub zip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "Cart must have at least one item"))]
    #[validate]
    pub items: Vec<CheckoutItem>,
    #[validate]
    pub customer: CustomerInfo,
    #[schema(value_type = String, example = "delivery")]
    pub delivery_type: DeliveryType,
    #[validate]
    pub address: Option<AddressInput>,
    #[serde(default)]
    pub delivery_days: i32,
    #[serde(default)]
    #[schema(value_type = String, example = "19.90")]
    pub shipping_cost: Decimal,
    #[schema(value_type = String, example = "pix")]
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    /// Where the customer completes the payment; absent for pickup.
    pub redirect_url: Option<String>,
    /// Present immediately for pickup orders; paid orders receive theirs
    /// at settlement.
    pub tracking_code: Option<String>,
}

/// Checkout session initiator: validates the cart against the stock
/// ledger, persists the pending order aggregate and opens a payment
/// session with exactly one provider (or settles synchronously for
/// in-store pickup).
#[derive(Clone)]
pub struct CheckoutService {
    orders: Arc<OrderService>,
    stock: Arc<StockService>,
    coupons: Arc<CouponService>,
    processors: ProcessorRegistry,
    settlement: Arc<SettlementService>,
    event_sender: EventSender,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<OrderService>,
        stock: Arc<StockService>,
        coupons: Arc<CouponService>,
        processors: ProcessorRegistry,
        settlement: Arc<SettlementService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            stock,
            coupons,
            processors,
            settlement,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(payment_method = ?request.payment_method))]
    pub async fn create_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }
        validate_fulfillment(&request)?;

        // Advisory availability check; the settlement decrement is the
        // authority and floors at zero under races
        let lines: Vec<StockLine> = request
            .items
            .iter()
            .map(|item| StockLine {
                product_id: item.product_id,
                color: item.selected_color.clone(),
                size: item.selected_size.clone(),
                quantity: item.quantity,
            })
            .collect();
        self.stock.check_availability(&lines).await?;

        let subtotal: Decimal = request
            .items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();

        let (discount_amount, coupon_code) = match request
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            Some(code) => {
                let discount = self.coupons.resolve_discount(code, subtotal).await?;
                (discount, Some(code.to_uppercase()))
            }
            None => (Decimal::ZERO, None),
        };

        let total = (subtotal - discount_amount + request.shipping_cost).max(Decimal::ZERO);

        let is_pickup = request.delivery_type == DeliveryType::Pickup;
        let order_number = allocate_order_number();
        let (status, tracking_code) = if is_pickup {
            // No payment gate for pickup: the order starts in processing
            // with its tracking code assigned at creation
            (OrderStatus::Processing, Some(generate_tracking_code()))
        } else {
            (OrderStatus::Pending, None)
        };

        let address = request.address.as_ref();
        let (order, items) = self
            .orders
            .create_order_with_items(CreateOrderInput {
                order_number,
                customer_name: request.customer.name.clone(),
                customer_email: request.customer.email.clone(),
                customer_phone: request.customer.phone.clone(),
                whatsapp_number: request.customer.whatsapp_number.clone(),
                delivery_type: request.delivery_type,
                address_street: address.map(|a| a.street.clone()),
                address_number: address.map(|a| a.number.clone()),
                address_complement: address.and_then(|a| a.complement.clone()),
                address_district: address.map(|a| a.district.clone()),
                address_city: address.map(|a| a.city.clone()),
                address_state: address.map(|a| a.state.clone()),
                address_zip: address.map(|a| a.zip.clone()),
                delivery_days: request.delivery_days,
                subtotal,
                shipping_cost: request.shipping_cost,
                discount_amount,
                total,
                coupon_code,
                payment_method: request.payment_method,
                status,
                tracking_code,
                items: request
                    .items
                    .iter()
                    .map(|item| CreateOrderItemInput {
                        product_id: item.product_id,
                        product_name: item.product_name.clone(),
                        product_image: item.product_image.clone(),
                        selected_color: item.selected_color.clone(),
                        selected_size: item.selected_size.clone(),
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                    })
                    .collect(),
            })
            .await?;

        let _ = self
            .event_sender
            .send(Event::CheckoutCompleted {
                order_id: order.id,
                payment_method: order.payment_method,
            })
            .await;

        match self.processors.for_method(request.payment_method) {
            None => {
                // In-store pickup: settle synchronously, no provider involved
                let outcome = self
                    .settlement
                    .settle(order.id, SettlementTrigger::PickupCheckout)
                    .await?;
                let tracking_code = match outcome {
                    SettlementOutcome::Settled { tracking_code } => Some(tracking_code),
                    SettlementOutcome::AlreadySettled => order.tracking_code.clone(),
                };
                info!(order_id = %order.id, "pickup order settled at checkout");
                Ok(CheckoutResponse {
                    order_id: order.id,
                    order_number: order.order_number,
                    redirect_url: None,
                    tracking_code,
                })
            }
            Some(processor) => {
                let session = processor.create_session(&order, &items).await.map_err(
                    |err| {
                        // The pending order row stays behind for diagnostics;
                        // no stock was touched
                        warn!(
                            order_id = %order.id,
                            error = %err,
                            "provider session creation failed; pending order retained"
                        );
                        err
                    },
                )?;

                self.orders
                    .set_payment_intent(order.id, &session.session_id)
                    .await?;

                info!(
                    order_id = %order.id,
                    provider = %processor.provider(),
                    "payment session opened"
                );
                Ok(CheckoutResponse {
                    order_id: order.id,
                    order_number: order.order_number,
                    redirect_url: Some(session.redirect_url),
                    tracking_code: None,
                })
            }
        }
    }
}

/// Order numbers derive from a fresh UUID so uniqueness is structural.
fn allocate_order_number() -> String {
    let id = Uuid::new_v4();
    let digest = id.simple().to_string().to_uppercase();
    format!("BQ-{}", &digest[..12])
}

/// Home delivery requires a complete address, and in-store payment is
/// only valid for pickup orders (the no-payment-gate flow).
fn validate_fulfillment(request: &CheckoutRequest) -> Result<(), ServiceError> {
    if request.delivery_type == DeliveryType::Delivery && request.address.is_none() {
        return Err(ServiceError::ValidationError(
            "address is required for home delivery".to_string(),
        ));
    }
    let pickup = request.delivery_type == DeliveryType::Pickup;
    let in_store = request.payment_method == PaymentMethod::InStore;
    if pickup != in_store {
        return Err(ServiceError::ValidationError(if pickup {
            "pickup orders are paid in store".to_string()
        } else {
            "in-store payment requires pickup fulfillment".to_string()
        }));
    }
    if request.shipping_cost < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "shipping cost cannot be negative".to_string(),
        ));
    }
    Ok(())
}
