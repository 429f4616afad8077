use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use querylink_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;

/// Build the API router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Streaming chat
        .route("/api/chat", post(routes::chat))
        // Browser → server query outcomes
        .route("/api/query-callback", post(routes::query_callback))
        // Monitoring
        .route("/api/health", get(routes::health))
        .route("/api/bridge/pending", get(routes::pending))
        .route("/api/sessions", get(routes::list_sessions))
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut app = build_router(self.state.clone());
        if self.config.cors_permissive {
            app = app.layer(CorsLayer::permissive());
        }

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(
            bind = %self.config.bind,
            responder = self.state.responder.name(),
            "Gateway listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
