use async_trait::async_trait;
use http::HeaderMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    constant_time_eq, signed_payload_hmac, timestamp_within_tolerance, PaymentProcessor,
    PaymentProvider, PaymentSession, ProviderEvent, ProviderPaymentStatus,
};
use crate::entities::{order, order_item};
use crate::errors::ServiceError;

const STRIPE_API_BASE: &str = "https://api.stripe.com";
const CHECKOUT_CURRENCY: &str = "brl";

/// Card payments via Stripe Checkout Sessions.
#[derive(Clone)]
pub struct StripeProcessor {
    http: reqwest::Client,
    api_base: String,
    secret_key: Option<String>,
    webhook_secret: Option<String>,
    tolerance_secs: u64,
    success_url: String,
    cancel_url: String,
}

impl StripeProcessor {
    pub fn new(
        secret_key: Option<String>,
        webhook_secret: Option<String>,
        tolerance_secs: u64,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: STRIPE_API_BASE.to_string(),
            secret_key,
            webhook_secret,
            tolerance_secs,
            success_url,
            cancel_url,
        }
    }

    fn amount_in_cents(price: Decimal) -> Result<i64, ServiceError> {
        (price * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!("amount {} not representable in cents", price))
            })
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    #[instrument(skip(self, order, items), fields(order_id = %order.id))]
    async fn create_session(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<PaymentSession, ServiceError> {
        let secret_key = self.secret_key.as_ref().ok_or_else(|| {
            ServiceError::ProviderUnavailable("Stripe is not configured".to_string())
        })?;

        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), self.success_url.clone()),
            ("cancel_url".into(), self.cancel_url.clone()),
            ("payment_method_types[0]".into(), "card".into()),
            ("metadata[order_id]".into(), order.id.to_string()),
            ("metadata[order_number]".into(), order.order_number.clone()),
        ];
        for (i, item) in items.iter().enumerate() {
            params.push((
                format!("line_items[{i}][quantity]"),
                item.quantity.to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][currency]"),
                CHECKOUT_CURRENCY.into(),
            ));
            params.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                Self::amount_in_cents(item.unit_price)?.to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                format!(
                    "{} ({}/{})",
                    item.product_name, item.selected_color, item.selected_size
                ),
            ));
        }
        if order.shipping_cost > Decimal::ZERO {
            let i = items.len();
            params.push((format!("line_items[{i}][quantity]"), "1".into()));
            params.push((
                format!("line_items[{i}][price_data][currency]"),
                CHECKOUT_CURRENCY.into(),
            ));
            params.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                Self::amount_in_cents(order.shipping_cost)?.to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                "Frete".into(),
            ));
        }

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ProviderUnavailable(format!("Stripe request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "Stripe checkout session creation rejected");
            return Err(ServiceError::ProviderUnavailable(format!(
                "Stripe returned {}",
                status
            )));
        }

        let session: CheckoutSessionResponse = response.json().await.map_err(|e| {
            ServiceError::ProviderUnavailable(format!("invalid Stripe response: {}", e))
        })?;
        let redirect_url = session.url.ok_or_else(|| {
            ServiceError::ProviderUnavailable("Stripe session has no redirect URL".to_string())
        })?;

        Ok(PaymentSession {
            session_id: session.id,
            redirect_url,
        })
    }

    /// Stripe-Signature header: `t=<unix>,v1=<hmac>` over `{t}.{payload}`.
    fn verify_signature(&self, headers: &HeaderMap, payload: &[u8]) -> bool {
        let Some(secret) = self.webhook_secret.as_ref() else {
            return false;
        };
        let Some(sig) = headers
            .get("Stripe-Signature")
            .and_then(|h| h.to_str().ok())
        else {
            return false;
        };

        let mut ts = "";
        let mut v1 = "";
        for part in sig.split(',') {
            let mut it = part.trim().split('=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => ts = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if ts.is_empty() || v1.is_empty() {
            return false;
        }
        if !timestamp_within_tolerance(ts, self.tolerance_secs) {
            return false;
        }

        let expected = signed_payload_hmac(secret, ts, payload);
        constant_time_eq(&expected, v1)
    }

    fn parse_event(&self, payload: &[u8]) -> Result<ProviderEvent, ServiceError> {
        let json: Value = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

        let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let object = json
            .pointer("/data/object")
            .cloned()
            .unwrap_or(Value::Null);

        let provider_payment_id = object
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ServiceError::BadRequest("event object carries no id".to_string())
            })?
            .to_string();

        let order_ref = object
            .pointer("/metadata/order_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        let status = match event_type {
            "checkout.session.completed" => {
                // A completed session is only money-in-hand once payment_status
                // says so; async methods complete before they are paid
                let paid = object
                    .get("payment_status")
                    .and_then(|v| v.as_str())
                    .map(|s| s == "paid")
                    .unwrap_or(true);
                if paid {
                    ProviderPaymentStatus::Succeeded
                } else {
                    ProviderPaymentStatus::Pending
                }
            }
            "checkout.session.async_payment_succeeded" => ProviderPaymentStatus::Succeeded,
            "checkout.session.async_payment_failed" | "payment_intent.payment_failed" => {
                ProviderPaymentStatus::Failed
            }
            "checkout.session.expired" => ProviderPaymentStatus::Cancelled,
            "charge.refunded" => ProviderPaymentStatus::Refunded,
            _ => ProviderPaymentStatus::Pending,
        };

        Ok(ProviderEvent {
            provider: PaymentProvider::Stripe,
            event_id: json
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            provider_payment_id,
            order_ref,
            status,
        })
    }
}
