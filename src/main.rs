use anyhow::anyhow;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Router};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use paywatch::api;
use paywatch::config::AppConfig;
use paywatch::crypto::SecretBox;
use paywatch::database;
use paywatch::logging::init_tracing;
use paywatch::middleware::auth::{admin_auth, api_key_auth};
use paywatch::middleware::rate_limit::{rate_limit, RateLimiter};
use paywatch::providers::mpesa::{MpesaConfig, MpesaProvider};
use paywatch::providers::registry::ProviderRegistry;
use paywatch::services::reconcile::{ReconcileConfig, ReconcileWorker};
use paywatch::state::AppState;

/// Graceful shutdown signal handler
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

    info!("shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    // Fatal on missing DB_DSN or a bad AES key: refuse to start.
    let config =
        Arc::new(AppConfig::from_env().map_err(|e| anyhow!("configuration error: {}", e))?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.app_env,
        "starting paywatch"
    );

    let pool = database::init_pool_from_config(&config.database).await?;
    let secrets =
        SecretBox::new(&config.security.aes_key).map_err(|e| anyhow!("AES key rejected: {}", e))?;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(
        MpesaProvider::new(MpesaConfig::from_env(), secrets.clone())
            .map_err(|e| anyhow!("mpesa provider init failed: {}", e))?,
    ));
    let registry = Arc::new(registry);

    let state = AppState {
        config: config.clone(),
        pool: pool.clone(),
        secrets,
        registry: registry.clone(),
        rate_limiter: RateLimiter::new(config.security.rate_limit_per_min),
    };

    // Reconciliation worker with cooperative shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconcileWorker::new(pool.clone(), registry.clone(), ReconcileConfig::from_env());
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));
    info!("reconcile worker spawned");

    // Public webhooks: provider-authenticated, never tenant-authenticated.
    let hook_routes = Router::new()
        .route(
            "/hooks/mpesa/{shortcode}",
            post(api::webhooks::mpesa_by_shortcode),
        )
        .route("/hooks/mpesa", post(api::webhooks::mpesa_by_token))
        .route(
            "/hooks/paywatch/c2b/validation",
            post(api::webhooks::c2b_validation),
        )
        .route(
            "/hooks/paywatch/c2b/confirmation",
            post(api::webhooks::c2b_confirmation),
        );

    let tenant_routes = Router::new()
        .route("/v1/payments/stk", post(api::payments::initiate_stk))
        .route("/v1/payments/b2c", post(api::payments::initiate_b2c))
        .route("/v1/payments", get(api::data::list_payments))
        .route("/v1/events", get(api::data::list_events))
        .route("/v1/mpesa/register-c2b", post(api::payments::register_c2b))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            api_key_auth,
        ))
        .layer(axum_middleware::from_fn_with_state(state.clone(), rate_limit));

    let admin_routes = Router::new()
        .route(
            "/v1/admin/tenants/onboard",
            post(api::admin::onboard_tenant),
        )
        .route("/admin/events/replay", post(api::admin::replay_events))
        .layer(axum_middleware::from_fn_with_state(state.clone(), admin_auth));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .merge(hook_routes)
        .merge(tenant_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "failed to bind listener");
        e
    })?;
    info!(address = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx.clone()))
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), worker_handle).await {
        error!(error = %e, "timed out waiting for worker shutdown");
    }

    info!("server shutdown complete");
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}
