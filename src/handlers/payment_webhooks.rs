use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    errors::ServiceError,
    payments::PaymentProvider,
    AppState,
};

/// POST /api/v1/webhooks/stripe
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    request_body = String,
    responses(
        (status = 200, description = "Webhook acknowledged"),
        (status = 401, description = "Invalid signature (production)", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    handle_provider_event(state, PaymentProvider::Stripe, headers, body).await
}

/// POST /api/v1/webhooks/pix
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/pix",
    request_body = String,
    responses(
        (status = 200, description = "Webhook acknowledged"),
        (status = 401, description = "Invalid signature (production)", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn pix_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    handle_provider_event(state, PaymentProvider::Pix, headers, body).await
}

/// Shared webhook pipeline: verify, dedupe, normalize, reconcile.
///
/// Providers retry aggressively on non-2xx, so every handled branch
/// acknowledges with 200; the settlement idempotency gate makes
/// duplicates and replays harmless. The single non-2xx branch is a
/// signature hard-fail under the production policy.
async fn handle_provider_event(
    state: AppState,
    provider: PaymentProvider,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let processor = state.services.processors.by_provider(provider);

    if !processor.verify_signature(&headers, &body) {
        if state.config.is_production() {
            warn!(%provider, "webhook signature verification failed; rejecting");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
        warn!(
            %provider,
            "webhook signature verification failed; processing defensively outside production"
        );
    }

    let event = match processor.parse_event(&body) {
        Ok(event) => event,
        Err(err) => {
            // A malformed payload will not become well-formed on retry;
            // acknowledge to stop the redelivery storm
            warn!(%provider, error = %err, "unparseable webhook payload acknowledged");
            return Ok(Json(json!({ "received": true })));
        }
    };

    if let Some(event_id) = event.event_id.clone() {
        if already_delivered(&state, provider, &event_id).await {
            info!(%provider, event_id = %event_id, "webhook event already processed");
            return Ok(Json(json!({ "received": true })));
        }
    }

    let outcome = state.services.reconciler.process_event(event).await?;
    info!(%provider, ?outcome, "webhook reconciled");

    Ok(Json(json!({ "received": true })))
}

/// Best-effort replay cache on the provider event id. When Redis is
/// absent or unreachable the reconciler's idempotency gate remains the
/// authority, so a cache miss only costs a redundant no-op pass.
async fn already_delivered(state: &AppState, provider: PaymentProvider, event_id: &str) -> bool {
    let Some(redis) = &state.redis else {
        return false;
    };
    let key = format!("wh:{}:{}", provider, event_id);
    match redis.get_async_connection().await {
        Ok(mut conn) => {
            let set: Result<bool, _> = redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(24 * 3600)
                .query_async(&mut conn)
                .await;
            matches!(set, Ok(false))
        }
        Err(err) => {
            warn!(error = %err, "webhook replay cache unavailable; relying on idempotency gate");
            false
        }
    }
}
