use async_trait::async_trait;
use http::HeaderMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    constant_time_eq, signed_payload_hmac, timestamp_within_tolerance, PaymentProcessor,
    PaymentProvider, PaymentSession, ProviderEvent, ProviderPaymentStatus,
};
use crate::entities::{order, order_item};
use crate::errors::ServiceError;

/// PIX payments via the billing gateway. The gateway signs webhooks with
/// `x-timestamp`/`x-signature` headers over `{timestamp}.{payload}`.
#[derive(Clone)]
pub struct PixProcessor {
    http: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    webhook_secret: Option<String>,
    tolerance_secs: u64,
    return_url: String,
    completion_url: String,
}

impl PixProcessor {
    pub fn new(
        api_url: Option<String>,
        api_key: Option<String>,
        webhook_secret: Option<String>,
        tolerance_secs: u64,
        return_url: String,
        completion_url: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
            webhook_secret,
            tolerance_secs,
            return_url,
            completion_url,
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
struct BillingResponse {
    data: BillingData,
}

#[derive(Debug, Deserialize)]
struct BillingData {
    id: String,
    url: String,
}

#[async_trait]
impl PaymentProcessor for PixProcessor {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Pix
    }

    #[instrument(skip(self, order, items), fields(order_id = %order.id))]
    async fn create_session(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<PaymentSession, ServiceError> {
        let (api_url, api_key) = match (self.api_url.as_ref(), self.api_key.as_ref()) {
            (Some(url), Some(key)) => (url, key),
            _ => {
                return Err(ServiceError::ProviderUnavailable(
                    "PIX gateway is not configured".to_string(),
                ))
            }
        };

        let mut products = Vec::with_capacity(items.len() + 1);
        for item in items {
            products.push(json!({
                "externalId": item.product_id.to_string(),
                "name": format!(
                    "{} ({}/{})",
                    item.product_name, item.selected_color, item.selected_size
                ),
                "quantity": item.quantity,
                "price": Self::amount_in_cents(item.unit_price)?,
            }));
        }
        if order.shipping_cost > Decimal::ZERO {
            products.push(json!({
                "externalId": "shipping",
                "name": "Frete",
                "quantity": 1,
                "price": Self::amount_in_cents(order.shipping_cost)?,
            }));
        }

        let body = json!({
            "frequency": "ONE_TIME",
            "methods": ["PIX"],
            "products": products,
            "returnUrl": self.return_url,
            "completionUrl": self.completion_url,
            "metadata": {
                "order_id": order.id.to_string(),
                "order_number": order.order_number,
            },
        });

        let response = self
            .http
            .post(format!("{}/v1/billing/create", api_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ProviderUnavailable(format!("PIX gateway request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "PIX billing creation rejected");
            return Err(ServiceError::ProviderUnavailable(format!(
                "PIX gateway returned {}",
                status
            )));
        }

        let billing: BillingResponse = response.json().await.map_err(|e| {
            ServiceError::ProviderUnavailable(format!("invalid PIX gateway response: {}", e))
        })?;

        Ok(PaymentSession {
            session_id: billing.data.id,
            redirect_url: billing.data.url,
        })
    }

    /// Generic HMAC scheme: `x-timestamp` and `x-signature` headers.
    fn verify_signature(&self, headers: &HeaderMap, payload: &[u8]) -> bool {
        let Some(secret) = self.webhook_secret.as_ref() else {
            return false;
        };
        let (Some(ts), Some(sig)) = (
            headers.get("x-timestamp").and_then(|h| h.to_str().ok()),
            headers.get("x-signature").and_then(|h| h.to_str().ok()),
        ) else {
            return false;
        };

        if !timestamp_within_tolerance(ts, self.tolerance_secs) {
            return false;
        }

        let expected = signed_payload_hmac(secret, ts, payload);
        constant_time_eq(&expected, sig)
    }

    fn parse_event(&self, payload: &[u8]) -> Result<ProviderEvent, ServiceError> {
        let json: Value = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

        let event_name = json.get("event").and_then(|v| v.as_str()).unwrap_or("");
        let data = json.get("data").cloned().unwrap_or(Value::Null);

        let provider_payment_id = data
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ServiceError::BadRequest("event data carries no billing id".to_string())
            })?
            .to_string();

        let order_ref = data
            .pointer("/metadata/order_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        // Billing status takes priority; the event name is the fallback for
        // gateways that omit it on terminal notifications
        let billing_status = data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_ascii_uppercase();

        let status = match billing_status.as_str() {
            "PAID" | "CONFIRMED" => ProviderPaymentStatus::Succeeded,
            "PENDING" | "IN_PROCESS" | "WAITING" => ProviderPaymentStatus::Pending,
            "EXPIRED" | "FAILED" => ProviderPaymentStatus::Failed,
            "CANCELLED" => ProviderPaymentStatus::Cancelled,
            "REFUNDED" => ProviderPaymentStatus::Refunded,
            _ => match event_name {
                "billing.paid" => ProviderPaymentStatus::Succeeded,
                "billing.failed" | "billing.expired" => ProviderPaymentStatus::Failed,
                "billing.cancelled" => ProviderPaymentStatus::Cancelled,
                "billing.refunded" => ProviderPaymentStatus::Refunded,
                _ => ProviderPaymentStatus::Pending,
            },
        };

        Ok(ProviderEvent {
            provider: PaymentProvider::Pix,
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

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn processor_with_secret() -> PixProcessor {
        PixProcessor::new(
            Some("https://gateway.example".into()),
            Some("pix_key".into()),
            Some("pix_webhook_secret".into()),
            300,
            "http://localhost/return".into(),
            "http://localhost/done".into(),
        )
    }

    fn signed_headers(payload: &[u8], secret: &str, ts: i64) -> HeaderMap {
        let ts = ts.to_string();
        let sig = signed_payload_hmac(secret, &ts, payload);
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&ts).unwrap());
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());
        headers
    }

    #[test]
    fn accepts_valid_signature() {
        let p = processor_with_secret();
        let payload = br#"{"event":"billing.paid"}"#;
        let headers = signed_headers(
            payload,
            "pix_webhook_secret",
            chrono::Utc::now().timestamp(),
        );
        assert!(p.verify_signature(&headers, payload));
    }

    #[test]
    fn rejects_invalid_signature_and_stale_timestamp() {
        let p = processor_with_secret();
        let payload = br#"{"event":"billing.paid"}"#;

        let bad = signed_headers(payload, "wrong", chrono::Utc::now().timestamp());
        assert!(!p.verify_signature(&bad, payload));

        let stale = signed_headers(
            payload,
            "pix_webhook_secret",
            chrono::Utc::now().timestamp() - 900,
        );
        assert!(!p.verify_signature(&stale, payload));
    }

    #[test]
    fn parses_paid_billing_event() {
        let p = processor_with_secret();
        let order_id = Uuid::new_v4();
        let payload = json!({
            "id": "evt_pix_1",
            "event": "billing.paid",
            "data": {
                "id": "bill_123",
                "status": "PAID",
                "metadata": {"order_id": order_id.to_string()}
            }
        });
        let event = p.parse_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.provider_payment_id, "bill_123");
        assert_eq!(event.order_ref, Some(order_id));
        assert_eq!(event.status, ProviderPaymentStatus::Succeeded);
    }

    #[test]
    fn event_name_is_fallback_when_status_missing() {
        let p = processor_with_secret();
        let payload = json!({
            "event": "billing.cancelled",
            "data": {"id": "bill_456"}
        });
        let event = p.parse_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.status, ProviderPaymentStatus::Cancelled);
        assert_eq!(event.event_id, None);
    }

    #[test]
    fn pending_statuses_are_no_ops() {
        let p = processor_with_secret();
        for status in ["PENDING", "IN_PROCESS", "WAITING"] {
            let payload = json!({
                "event": "billing.updated",
                "data": {"id": "bill_789", "status": status}
            });
            let event = p.parse_event(payload.to_string().as_bytes()).unwrap();
            assert_eq!(event.status, ProviderPaymentStatus::Pending, "for {status}");
        }
    }
}
