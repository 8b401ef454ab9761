//! HTTP server for the RAG system

pub mod routes;
pub mod state;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::service::HealthReport;
use state::AppState;

/// RAG HTTP Server
pub struct RagServer {
    config: RagConfig,
    state: AppState,
}

impl RagServer {
    /// Create a new RAG server
    pub async fn new(config: RagConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    /// Start the server and run until Ctrl+C, then persist state
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = build_router(self.state.clone(), self.config.server.enable_cors);

        tracing::info!("Starting RAG server on http://{}", addr);
        tracing::info!("API documentation: http://{}/api/info", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        tracing::info!("Server stopped, shutting down");
        let drain_timeout = Duration::from_secs(self.config.evaluation.judge_timeout_secs);
        self.state.shutdown(drain_timeout).await
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Build the router with all routes
pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let router = Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .nest("/api", routes::api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Health check endpoint: provider, index and database reachability
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.service().health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Readiness check endpoint
async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
