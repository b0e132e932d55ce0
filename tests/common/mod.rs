// Each integration test binary compiles this module on its own and
// uses a different subset of the helpers.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Method, Request},
    routing::get,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use boutique_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{coupon, product},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    notifications::NoopNotifier,
    payments::{
        PaymentProcessor, PaymentProvider, PaymentSession, PixProcessor, ProcessorRegistry,
        ProviderEvent, ProviderPaymentStatus, StripeProcessor,
    },
    AppState,
};

pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test123secret456";
pub const PIX_WEBHOOK_SECRET: &str = "pix_test_secret";

/// Helper harness for spinning up an application state backed by an
/// in-memory SQLite database behind the real router.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_options("test", None).await
    }

    /// Same harness with the production webhook signature policy active.
    pub async fn production() -> Self {
        Self::with_options("production", None).await
    }

    /// Same harness with mock payment processors that always open a
    /// session (for exercising the provider-redirect checkout branch).
    pub async fn with_mock_providers() -> Self {
        Self::with_options("test", Some(mock_registry())).await
    }

    async fn with_options(environment: &str, registry: Option<ProcessorRegistry>) -> Self {
        let cfg = AppConfig::new(
            "sqlite::memory:",
            "redis://127.0.0.1:6379",
            "127.0.0.1",
            18_080,
            environment,
        );

        // A single connection keeps every query on the same in-memory DB
        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");

        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let processors = registry.unwrap_or_else(|| {
            // Real adapters with signing secrets but no API credentials:
            // signature verification works, session creation reports the
            // provider as unavailable
            let stripe = Arc::new(StripeProcessor::new(
                None,
                Some(STRIPE_WEBHOOK_SECRET.to_string()),
                300,
                "http://localhost/success".to_string(),
                "http://localhost/cancel".to_string(),
            ));
            let pix = Arc::new(PixProcessor::new(
                None,
                None,
                Some(PIX_WEBHOOK_SECRET.to_string()),
                300,
                "http://localhost/return".to_string(),
                "http://localhost/done".to_string(),
            ));
            ProcessorRegistry::new(stripe, pix)
        });

        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            processors,
            Arc::new(NoopNotifier),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            redis: None,
        };

        let router = Router::new()
            .route("/health", get(boutique_api::handlers::health::health))
            .nest("/api/v1", boutique_api::handlers::api_v1_routes())
            .merge(boutique_api::openapi::openapi_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router response")
    }

    /// Send a raw-body request with explicit headers (webhook endpoints).
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }

        self.router
            .clone()
            .oneshot(builder.body(Body::from(body)).expect("build request"))
            .await
            .expect("router response")
    }

    /// Insert a product with the given variants directly into the store.
    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        variants: Value,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            image_url: Set(None),
            variants: Set(variants),
            active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(Some(Utc::now())),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Insert a coupon directly into the store.
    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: coupon::DiscountType,
        discount_value: Decimal,
        min_order_amount: Option<Decimal>,
        active: bool,
    ) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_type: Set(discount_type),
            discount_value: Set(discount_value),
            min_order_amount: Set(min_order_amount),
            expires_at: Set(None),
            active: Set(active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }

    /// Persist a pending delivery order for the given product lines,
    /// the way a card/PIX checkout leaves it before the webhook lands.
    pub async fn seed_pending_order(
        &self,
        lines: &[(&product::Model, &str, &str, i32)],
    ) -> boutique_api::entities::order::Model {
        use boutique_api::entities::order::{DeliveryType, OrderStatus, PaymentMethod};
        use boutique_api::services::orders::{CreateOrderInput, CreateOrderItemInput};

        let subtotal: Decimal = lines
            .iter()
            .map(|(p, _, _, qty)| p.price * Decimal::from(*qty))
            .sum();

        let (order, _items) = self
            .state
            .services
            .orders
            .create_order_with_items(CreateOrderInput {
                order_number: format!("BQ-{}", &Uuid::new_v4().simple().to_string()[..12]),
                customer_name: "Maria Silva".to_string(),
                customer_email: "maria@example.com".to_string(),
                customer_phone: "11999990000".to_string(),
                whatsapp_number: None,
                delivery_type: DeliveryType::Delivery,
                address_street: Some("Rua das Flores".to_string()),
                address_number: Some("123".to_string()),
                address_complement: None,
                address_district: Some("Centro".to_string()),
                address_city: Some("São Paulo".to_string()),
                address_state: Some("SP".to_string()),
                address_zip: Some("01000-000".to_string()),
                delivery_days: 5,
                subtotal,
                shipping_cost: Decimal::ZERO,
                discount_amount: Decimal::ZERO,
                total: subtotal,
                coupon_code: None,
                payment_method: PaymentMethod::Pix,
                status: OrderStatus::Pending,
                tracking_code: None,
                items: lines
                    .iter()
                    .map(|(p, color, size, qty)| CreateOrderItemInput {
                        product_id: p.id,
                        product_name: p.name.clone(),
                        product_image: None,
                        selected_color: color.to_string(),
                        selected_size: size.to_string(),
                        quantity: *qty,
                        unit_price: p.price,
                    })
                    .collect(),
            })
            .await
            .expect("seed pending order");

        order
    }

    /// Current stock of one variant, straight from the ledger.
    pub async fn variant_stock(&self, product_id: Uuid, color: &str, size: &str) -> i32 {
        self.state
            .services
            .stock
            .variant_stock(product_id, color, size)
            .await
            .expect("read variant stock")
            .expect("variant exists")
    }
}

/// Payment processor double that always opens a session and accepts any
/// signature; lets tests walk the provider-redirect checkout branch
/// without network access.
pub struct MockProcessor {
    provider: PaymentProvider,
}

impl MockProcessor {
    pub fn new(provider: PaymentProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    async fn create_session(
        &self,
        order: &boutique_api::entities::order::Model,
        _items: &[boutique_api::entities::order_item::Model],
    ) -> Result<PaymentSession, ServiceError> {
        Ok(PaymentSession {
            session_id: format!("mock_{}", order.id.simple()),
            redirect_url: format!("https://pay.example/session/{}", order.id),
        })
    }

    fn verify_signature(&self, _headers: &HeaderMap, _payload: &[u8]) -> bool {
        true
    }

    fn parse_event(&self, payload: &[u8]) -> Result<ProviderEvent, ServiceError> {
        let json: Value = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        Ok(ProviderEvent {
            provider: self.provider,
            event_id: None,
            provider_payment_id: json
                .get("payment_id")
                .and_then(|v| v.as_str())
                .unwrap_or("mock")
                .to_string(),
            order_ref: json
                .get("order_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok()),
            status: ProviderPaymentStatus::Succeeded,
        })
    }
}

pub fn mock_registry() -> ProcessorRegistry {
    ProcessorRegistry::new(
        Arc::new(MockProcessor::new(PaymentProvider::Stripe)),
        Arc::new(MockProcessor::new(PaymentProvider::Pix)),
    )
}
