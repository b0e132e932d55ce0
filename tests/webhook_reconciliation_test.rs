//! Webhook reconciliation: correlation, duplicate deliveries, terminal
//! failures and the signature policy.

mod common;

use axum::{
    body,
    http::{HeaderMap, HeaderValue, Method},
    response::Response,
};
use common::{TestApp, PIX_WEBHOOK_SECRET, STRIPE_WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

use boutique_api::entities::order::{OrderStatus, PaymentStatus};

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

fn hmac_hex(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn pix_headers(payload: &[u8], secret: &str) -> HeaderMap {
    let ts = chrono::Utc::now().timestamp().to_string();
    let sig = hmac_hex(secret, &ts, payload);
    let mut headers = HeaderMap::new();
    headers.insert("x-timestamp", HeaderValue::from_str(&ts).unwrap());
    headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());
    headers
}

fn stripe_headers(payload: &[u8], secret: &str) -> HeaderMap {
    let ts = chrono::Utc::now().timestamp().to_string();
    let sig = hmac_hex(secret, &ts, payload);
    let mut headers = HeaderMap::new();
    headers.insert(
        "Stripe-Signature",
        HeaderValue::from_str(&format!("t={},v1={}", ts, sig)).unwrap(),
    );
    headers
}

fn pix_paid_event(order_id: Option<Uuid>, billing_id: &str, event_id: &str) -> Vec<u8> {
    let mut data = json!({"id": billing_id, "status": "PAID"});
    if let Some(order_id) = order_id {
        data["metadata"] = json!({"order_id": order_id.to_string()});
    }
    json!({"id": event_id, "event": "billing.paid", "data": data})
        .to_string()
        .into_bytes()
}

#[tokio::test]
async fn unknown_order_is_acknowledged_with_zero_writes() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(
            "Echarpe",
            dec!(65.00),
            json!([{"color": "blue", "size": "U", "stock": 7}]),
        )
        .await;
    let order = app.seed_pending_order(&[(&product, "blue", "U", 1)]).await;

    // Neither the metadata order id nor the billing id match anything
    let payload = pix_paid_event(Some(Uuid::new_v4()), "bill_unknown", "evt_1");
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/pix",
            pix_headers(&payload, PIX_WEBHOOK_SECRET),
            payload,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["received"], json!(true));

    // Zero writes: the unrelated pending order and the stock are untouched
    let untouched = app
        .state
        .services
        .orders
        .get_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.payment_status, PaymentStatus::Pending);
    assert!(untouched.tracking_code.is_none());
    assert_eq!(app.variant_stock(product.id, "blue", "U").await, 7);
}

#[tokio::test]
async fn duplicate_success_deliveries_settle_exactly_once() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(
            "Vestido Longo",
            dec!(289.00),
            json!([{"color": "black", "size": "G", "stock": 6}]),
        )
        .await;
    let order = app.seed_pending_order(&[(&product, "black", "G", 2)]).await;

    // Two deliveries of the same success notification, distinct event ids
    // (replay cache disabled in tests; the idempotency gate is on trial)
    for event_id in ["evt_a", "evt_b"] {
        let payload = pix_paid_event(Some(order.id), "bill_777", event_id);
        let response = app
            .request_raw(
                Method::POST,
                "/api/v1/webhooks/pix",
                pix_headers(&payload, PIX_WEBHOOK_SECRET),
                payload,
            )
            .await;
        assert_eq!(response.status(), 200);
    }

    let settled = app
        .state
        .services
        .orders
        .get_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.payment_status, PaymentStatus::Paid);
    assert_eq!(settled.status, OrderStatus::Processing);
    let tracking = settled.tracking_code.clone().expect("tracking code set");
    assert_eq!(tracking.len(), 8);

    // Stock decremented exactly once
    assert_eq!(app.variant_stock(product.id, "black", "G").await, 4);
}

#[tokio::test]
async fn fallback_correlation_uses_the_stored_payment_intent() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(
            "Macacão",
            dec!(210.00),
            json!([{"color": "olive", "size": "M", "stock": 3}]),
        )
        .await;
    let order = app.seed_pending_order(&[(&product, "olive", "M", 1)]).await;
    app.state
        .services
        .orders
        .set_payment_intent(order.id, "bill_fallback_1")
        .await
        .unwrap();

    // No correlation metadata in the event; only the billing id matches
    let payload = pix_paid_event(None, "bill_fallback_1", "evt_fb");
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/pix",
            pix_headers(&payload, PIX_WEBHOOK_SECRET),
            payload,
        )
        .await;
    assert_eq!(response.status(), 200);

    let settled = app
        .state
        .services
        .orders
        .get_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.payment_status, PaymentStatus::Paid);
    assert_eq!(app.variant_stock(product.id, "olive", "M").await, 2);
}

#[tokio::test]
async fn failure_event_marks_payment_failed_and_leaves_fulfillment_alone() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(
            "Tênis Branco",
            dec!(199.00),
            json!([{"color": "white", "size": "38", "stock": 5}]),
        )
        .await;
    let order = app.seed_pending_order(&[(&product, "white", "38", 1)]).await;

    let payload = json!({
        "id": "evt_fail",
        "event": "billing.failed",
        "data": {
            "id": "bill_dead",
            "status": "EXPIRED",
            "metadata": {"order_id": order.id.to_string()}
        }
    })
    .to_string()
    .into_bytes();
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/pix",
            pix_headers(&payload, PIX_WEBHOOK_SECRET),
            payload,
        )
        .await;
    assert_eq!(response.status(), 200);

    let dead = app
        .state
        .services
        .orders
        .get_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dead.payment_status, PaymentStatus::Failed);
    // Fulfillment status untouched: a dead order, not a cancelled shipment
    assert_eq!(dead.status, OrderStatus::Pending);
    assert!(dead.tracking_code.is_none());
    assert_eq!(app.variant_stock(product.id, "white", "38").await, 5);
}

#[tokio::test]
async fn failure_after_settlement_cannot_unpay_the_order() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(
            "Pulseira",
            dec!(39.00),
            json!([{"color": "gold", "size": "U", "stock": 4}]),
        )
        .await;
    let order = app.seed_pending_order(&[(&product, "gold", "U", 1)]).await;

    let paid = pix_paid_event(Some(order.id), "bill_pp", "evt_p1");
    app.request_raw(
        Method::POST,
        "/api/v1/webhooks/pix",
        pix_headers(&paid, PIX_WEBHOOK_SECRET),
        paid,
    )
    .await;

    // An out-of-order failure notification for the same billing
    let failed = json!({
        "id": "evt_p2",
        "event": "billing.failed",
        "data": {
            "id": "bill_pp",
            "status": "FAILED",
            "metadata": {"order_id": order.id.to_string()}
        }
    })
    .to_string()
    .into_bytes();
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/pix",
            pix_headers(&failed, PIX_WEBHOOK_SECRET),
            failed,
        )
        .await;
    assert_eq!(response.status(), 200);

    let settled = app
        .state
        .services
        .orders
        .get_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.payment_status, PaymentStatus::Paid);
    assert_eq!(app.variant_stock(product.id, "gold", "U").await, 3);
}

#[tokio::test]
async fn pending_renotification_records_the_payment_id_without_settling() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(
            "Anel Prata",
            dec!(55.00),
            json!([{"color": "silver", "size": "16", "stock": 3}]),
        )
        .await;
    let order = app.seed_pending_order(&[(&product, "silver", "16", 1)]).await;

    let payload = json!({
        "id": "evt_pending",
        "event": "billing.updated",
        "data": {
            "id": "bill_inflight",
            "status": "IN_PROCESS",
            "metadata": {"order_id": order.id.to_string()}
        }
    })
    .to_string()
    .into_bytes();
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/pix",
            pix_headers(&payload, PIX_WEBHOOK_SECRET),
            payload,
        )
        .await;
    assert_eq!(response.status(), 200);

    let pending = app
        .state
        .services
        .orders
        .get_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.payment_status, PaymentStatus::Pending);
    assert_eq!(pending.payment_intent_id.as_deref(), Some("bill_inflight"));
    assert_eq!(app.variant_stock(product.id, "silver", "16").await, 3);
}

#[tokio::test]
async fn stripe_success_webhook_settles_a_card_order() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(
            "Jaqueta Jeans",
            dec!(259.00),
            json!([{"color": "blue", "size": "M", "stock": 4}]),
        )
        .await;
    let order = app.seed_pending_order(&[(&product, "blue", "M", 1)]).await;

    let payload = json!({
        "id": "evt_stripe_1",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_test_123",
            "payment_status": "paid",
            "metadata": {"order_id": order.id.to_string()}
        }}
    })
    .to_string()
    .into_bytes();
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/stripe",
            stripe_headers(&payload, STRIPE_WEBHOOK_SECRET),
            payload,
        )
        .await;
    assert_eq!(response.status(), 200);

    let settled = app
        .state
        .services
        .orders
        .get_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.payment_status, PaymentStatus::Paid);
    assert_eq!(app.variant_stock(product.id, "blue", "M").await, 3);
}

#[tokio::test]
async fn production_rejects_unsigned_webhooks() {
    let app = TestApp::production().await;
    let payload = pix_paid_event(Some(Uuid::new_v4()), "bill_x", "evt_x");

    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/pix",
            HeaderMap::new(),
            payload,
        )
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn production_accepts_properly_signed_webhooks() {
    let app = TestApp::production().await;
    let payload = pix_paid_event(Some(Uuid::new_v4()), "bill_y", "evt_y");

    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/pix",
            pix_headers(&payload, PIX_WEBHOOK_SECRET),
            payload,
        )
        .await;
    // Signed and unresolvable: acknowledged without action
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["received"], json!(true));
}

#[tokio::test]
async fn malformed_payload_is_acknowledged_to_stop_retries() {
    let app = TestApp::new().await;
    let payload = b"not json at all".to_vec();

    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/pix",
            pix_headers(&payload, PIX_WEBHOOK_SECRET),
            payload,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["received"], json!(true));
}

#[tokio::test]
async fn admin_status_update_races_do_not_touch_payment_state() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(
            "Bota Couro",
            dec!(320.00),
            json!([{"color": "black", "size": "37", "stock": 2}]),
        )
        .await;
    let order = app.seed_pending_order(&[(&product, "black", "37", 1)]).await;

    // Settle via webhook, then walk the fulfillment workflow as an admin
    let payload = pix_paid_event(Some(order.id), "bill_admin", "evt_adm");
    app.request_raw(
        Method::POST,
        "/api/v1/webhooks/pix",
        pix_headers(&payload, PIX_WEBHOOK_SECRET),
        payload,
    )
    .await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order.id),
            Some(json!({"status": "shipped", "shipping_tracking_code": "BR123456789"})),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"].as_str().unwrap(), "shipped");
    // Payment state is admin-proof
    assert_eq!(body["data"]["payment_status"].as_str().unwrap(), "paid");

    // Backwards transition is rejected
    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order.id),
            Some(json!({"status": "pending"})),
        )
        .await;
    assert_eq!(response.status(), 400);
}
