use async_trait::async_trait;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{order, order_item};
use crate::entities::order::PaymentMethod;
use crate::errors::ServiceError;

pub mod pix;
pub mod stripe;

pub use pix::PixProcessor;
pub use stripe::StripeProcessor;

/// External payment providers handled by this service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Pix,
}

/// A payment session opened with an external provider
#[derive(Debug, Clone)]
pub struct PaymentSession {
    /// Opaque provider session/billing id, stored as the order's payment_intent_id
    pub session_id: String,
    /// Where the customer completes the payment
    pub redirect_url: String,
}

/// Provider payment state normalized across providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderPaymentStatus {
    Succeeded,
    Pending,
    Failed,
    Cancelled,
    Refunded,
}

/// A provider webhook payload normalized into the common shape the
/// reconciler consumes. Provider-specific envelopes stop here.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub provider: PaymentProvider,
    /// Provider-side event id, used for the best-effort replay cache
    pub event_id: Option<String>,
    /// Provider-side payment/session/billing id
    pub provider_payment_id: String,
    /// Order id carried in the session's correlation metadata, when present
    pub order_ref: Option<Uuid>,
    pub status: ProviderPaymentStatus,
}

/// One external payment processor. Adapters only open sessions, verify
/// webhook authenticity and normalize payloads; all state transitions
/// happen in the reconciler and settlement services.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Open a payment session for the order, embedding the order id in the
    /// provider's correlation metadata.
    async fn create_session(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<PaymentSession, ServiceError>;

    /// Verify the provider's signature over the raw webhook payload.
    fn verify_signature(&self, headers: &HeaderMap, payload: &[u8]) -> bool;

    /// Normalize a raw webhook payload into a `ProviderEvent`.
    fn parse_event(&self, payload: &[u8]) -> Result<ProviderEvent, ServiceError>;
}

/// Registry mapping payment methods and webhook routes to processors
#[derive(Clone)]
pub struct ProcessorRegistry {
    stripe: Arc<dyn PaymentProcessor>,
    pix: Arc<dyn PaymentProcessor>,
}

impl ProcessorRegistry {
    pub fn new(stripe: Arc<dyn PaymentProcessor>, pix: Arc<dyn PaymentProcessor>) -> Self {
        Self { stripe, pix }
    }

    /// Processor handling the given checkout payment method; `None` for
    /// in-store payments, which never touch an external provider.
    pub fn for_method(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentProcessor>> {
        match method {
            PaymentMethod::Pix => Some(self.pix.clone()),
            PaymentMethod::CreditCard | PaymentMethod::DebitCard => Some(self.stripe.clone()),
            PaymentMethod::InStore => None,
        }
    }

    pub fn by_provider(&self, provider: PaymentProvider) -> Arc<dyn PaymentProcessor> {
        match provider {
            PaymentProvider::Stripe => self.stripe.clone(),
            PaymentProvider::Pix => self.pix.clone(),
        }
    }
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

pub(crate) fn timestamp_within_tolerance(ts: &str, tolerance_secs: u64) -> bool {
    match ts.parse::<i64>() {
        Ok(ts_i) => {
            let now = chrono::Utc::now().timestamp();
            (now - ts_i).unsigned_abs() <= tolerance_secs
        }
        Err(_) => false,
    }
}

/// HMAC-SHA256 over `{timestamp}.{payload}`, hex-encoded. Both providers
/// sign the same shape; only the header carrying it differs.
pub(crate) fn signed_payload_hmac(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
