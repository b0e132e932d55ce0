use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Order confirmation payload sent after settlement
#[derive(Debug, Clone, Serialize)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub order_number: String,
    pub tracking_code: String,
    pub customer_name: String,
    pub customer_email: String,
    pub whatsapp_number: Option<String>,
    pub total: Decimal,
}

/// Fulfillment status change payload sent after admin updates
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub order_id: Uuid,
    pub order_number: String,
    pub new_status: String,
    pub tracking_code: Option<String>,
    pub shipping_tracking_code: Option<String>,
    pub customer_email: String,
    pub whatsapp_number: Option<String>,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected notification with status {0}")]
    Gateway(http::StatusCode),
    #[error("no notification channel configured")]
    Disabled,
}

/// Outbound customer notifications (email, WhatsApp). Callers wrap every
/// dispatch in [`best_effort`]; implementations report failures honestly
/// and leave the swallowing to that single boundary.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(
        &self,
        message: &OrderConfirmation,
    ) -> Result<(), NotificationError>;

    async fn send_status_update(&self, message: &StatusUpdate) -> Result<(), NotificationError>;
}

/// The single place where notification failures are swallowed. Failures
/// are logged with their context and never propagate; payment
/// confirmation and stock settlement must not depend on messaging.
pub async fn best_effort<T, E, F>(context: &'static str, fut: F)
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    if let Err(err) = fut.await {
        warn!(context = context, error = %err, "notification dispatch failed");
    }
}

/// HTTP notifier posting JSON to the configured gateway endpoints.
#[derive(Clone)]
pub struct HttpNotifier {
    http: reqwest::Client,
    email_url: Option<String>,
    whatsapp_url: Option<String>,
    api_key: Option<String>,
}

impl HttpNotifier {
    pub fn new(
        email_url: Option<String>,
        whatsapp_url: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            email_url,
            whatsapp_url,
            api_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.email_url.is_some() || self.whatsapp_url.is_some()
    }

    async fn post_json<T: Serialize>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<(), NotificationError> {
        let mut request = self.http.post(url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(NotificationError::Gateway(response.status()));
        }
        Ok(())
    }

    /// Post the payload to every applicable gateway concurrently. The
    /// WhatsApp channel only fires when the customer left a number.
    async fn dispatch<T: Serialize + Sync>(
        &self,
        payload: &T,
        has_whatsapp: bool,
    ) -> Result<(), NotificationError> {
        use futures::future::OptionFuture;

        let email: OptionFuture<_> = self
            .email_url
            .as_deref()
            .map(|url| self.post_json(url, payload))
            .into();
        let whatsapp: OptionFuture<_> = self
            .whatsapp_url
            .as_deref()
            .filter(|_| has_whatsapp)
            .map(|url| self.post_json(url, payload))
            .into();

        let (email_result, whatsapp_result) = futures::join!(email, whatsapp);
        if email_result.is_none() && whatsapp_result.is_none() {
            return Err(NotificationError::Disabled);
        }
        email_result.transpose()?;
        whatsapp_result.transpose()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self, message), fields(order_id = %message.order_id))]
    async fn send_order_confirmation(
        &self,
        message: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        self.dispatch(message, message.whatsapp_number.is_some())
            .await
    }

    #[instrument(skip(self, message), fields(order_id = %message.order_id))]
    async fn send_status_update(&self, message: &StatusUpdate) -> Result<(), NotificationError> {
        self.dispatch(message, message.whatsapp_number.is_some())
            .await
    }
}

/// Notifier that records nothing and always succeeds; used by tests and
/// by deployments with no messaging gateways configured.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_order_confirmation(
        &self,
        _message: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn send_status_update(&self, _message: &StatusUpdate) -> Result<(), NotificationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        // Must not panic or propagate
        best_effort::<(), _, _>("test dispatch", async {
            Err::<(), _>(NotificationError::Disabled)
        })
        .await;
    }

    #[tokio::test]
    async fn unconfigured_http_notifier_reports_disabled() {
        let notifier = HttpNotifier::new(None, None, None);
        assert!(!notifier.is_configured());

        let message = OrderConfirmation {
            order_id: Uuid::new_v4(),
            order_number: "BQ-TEST".into(),
            tracking_code: "ABCD1234".into(),
            customer_name: "Maria".into(),
            customer_email: "maria@example.com".into(),
            whatsapp_number: None,
            total: Decimal::new(1000, 2),
        };
        let result = notifier.send_order_confirmation(&message).await;
        assert!(matches!(result, Err(NotificationError::Disabled)));
    }
}
