use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::http::HeaderValue;
use axum::{routing::get, Router};
use tokio::{signal, sync::mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use boutique_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Redis backs the webhook replay cache; construction only, the
    // connection is attempted per use and failures degrade gracefully
    let redis_client = match redis::Client::open(cfg.redis_url.clone()) {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            error!("Invalid Redis URL, webhook replay cache disabled: {}", err);
            None
        }
    };

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Payment processors, wired from configuration
    let stripe = Arc::new(api::payments::StripeProcessor::new(
        cfg.stripe_secret_key.clone(),
        cfg.stripe_webhook_secret.clone(),
        cfg.webhook_tolerance_secs,
        cfg.checkout_success_url.clone(),
        cfg.checkout_cancel_url.clone(),
    ));
    let pix = Arc::new(api::payments::PixProcessor::new(
        cfg.pix_api_url.clone(),
        cfg.pix_api_key.clone(),
        cfg.pix_webhook_secret.clone(),
        cfg.webhook_tolerance_secs,
        cfg.checkout_cancel_url.clone(),
        cfg.checkout_success_url.clone(),
    ));
    let processors = api::payments::ProcessorRegistry::new(stripe, pix);

    // Customer notifications: HTTP gateways when configured, no-op otherwise
    let http_notifier = api::notifications::HttpNotifier::new(
        cfg.notification_email_url.clone(),
        cfg.notification_whatsapp_url.clone(),
        cfg.notification_api_key.clone(),
    );
    let notifier: Arc<dyn api::notifications::Notifier> = if http_notifier.is_configured() {
        Arc::new(http_notifier)
    } else {
        info!("No notification gateways configured; customer messaging disabled");
        Arc::new(api::notifications::NoopNotifier)
    };

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        event_sender.clone(),
        processors,
        notifier,
    );

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
        redis: redis_client,
    };

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        info!("Using permissive CORS because explicit origins were not configured");
        CorsLayer::permissive()
    } else {
        error!("Missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        return Err(
            "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
                .into(),
        );
    };

    // Build router: status/health + v1 API + OpenAPI document
    let app = Router::<api::AppState>::new()
        .route("/", get(|| async { "boutique-api up" }))
        .route("/health", get(api::handlers::health::health))
        .nest("/api/v1", api::handlers::api_v1_routes())
        .merge(api::openapi::openapi_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors_layer)
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("boutique-api listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
