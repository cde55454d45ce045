//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, hub statistics and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status with component stats
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (ready while CONNECTED)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /quotes/{code}` - latest cached quote and its tier

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::connection::ConnectionState;
use crate::domain::quote::{PriorityTier, Quote};
use crate::infrastructure::hub::{HubStats, QuoteHub};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Component statistics.
    pub hub: HubStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected upstream.
    Healthy,
    /// Connecting or reconnecting.
    Degraded,
    /// Disconnected or given up.
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Connecting | ConnectionState::Reconnecting => Self::Degraded,
            ConnectionState::Disconnected | ConnectionState::Error => Self::Unhealthy,
        }
    }
}

/// Cached quote lookup response.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteResponse {
    /// Tier holding the quote.
    pub tier: PriorityTier,
    /// The quote.
    pub quote: Quote,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    hub: Arc<QuoteHub>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, hub: Arc<QuoteHub>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            hub,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/quotes/{code}", get(quote_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.hub.connection_state().is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn quote_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(code): Path<String>,
) -> Response {
    match state.hub.get_with_tier(&code) {
        Some((tier, quote)) => Json(QuoteResponse { tier, quote }).into_response(),
        None => (StatusCode::NOT_FOUND, format!("no cached quote for {code}")).into_response(),
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let hub = state.hub.stats();
    HealthResponse {
        status: hub.connection.state.into(),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        hub,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
