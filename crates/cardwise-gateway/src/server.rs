//! HTTP server implementation using Axum.

use axum::{Router, routing::get};
use cardwise_agent::RagAgent;
use cardwise_core::config::GatewayConfig;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    /// Built once at startup; its index is read-only from here on.
    pub agent: Arc<RagAgent>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(gateway_config: GatewayConfig, agent: Arc<RagAgent>) -> Self {
        Self {
            gateway_config,
            agent,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the router with CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    // Example: CARDWISE_CORS_ORIGINS=https://cards.example.com,https://app.example.com
    let cors = match std::env::var("CARDWISE_CORS_ORIGINS") {
        Ok(origins_str) => {
            let origins: Vec<_> = origins_str
                .split(',')
                .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                .collect();
            cors.allow_origin(origins)
        }
        Err(_) => cors.allow_origin(Any),
    };

    Router::new()
        .route("/askBot", get(super::routes::ask_bot))
        .route("/health", get(super::routes::health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the HTTP server and serve until Ctrl-C.
pub async fn start(config: &GatewayConfig, agent: Arc<RagAgent>) -> anyhow::Result<()> {
    let app = build_router(AppState::new(config.clone(), agent));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
        })
        .await?;
    Ok(())
}
