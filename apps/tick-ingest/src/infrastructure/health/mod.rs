//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, pipeline status reporting, tick export
//! and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready while the feed is connected)
//! - `GET /export` - Export window as a JSON array of ticks
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{BatcherStatus, EpochBatcher, TickBuffer};
use crate::domain::connection::ConnectionState;
use crate::domain::tick::Tick;
use crate::infrastructure::events::{EventBusStats, SharedEventBus};
use crate::infrastructure::feed::SupervisorHandle;
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
    /// Feed connection status.
    pub feed: FeedStatus,
    /// Tick buffer status.
    pub buffer: BufferStatus,
    /// Epoch batcher status.
    pub batcher: BatcherStatus,
    /// Event bus listener counts.
    pub events: EventBusStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected and ticks are flowing.
    Healthy,
    /// Connecting, or connected but quiet.
    Degraded,
    /// No connection.
    Unhealthy,
}

/// Feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    /// Connection state.
    pub state: &'static str,
    /// Whether the connection is open.
    pub connected: bool,
    /// Whether a tick arrived recently.
    pub has_recent_data: bool,
}

/// Tick buffer status.
#[derive(Debug, Clone, Serialize)]
pub struct BufferStatus {
    /// Ticks in the display window.
    pub display_len: usize,
    /// Ticks in the export window.
    pub export_len: usize,
    /// Most recent tick.
    pub latest: Option<Tick>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    supervisor: SupervisorHandle,
    buffer: Arc<TickBuffer>,
    batcher: Arc<EpochBatcher>,
    bus: SharedEventBus,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        supervisor: SupervisorHandle,
        buffer: Arc<TickBuffer>,
        batcher: Arc<EpochBatcher>,
    ) -> Self {
        let bus = Arc::clone(supervisor.bus());
        Self {
            version,
            started_at: Instant::now(),
            supervisor,
            buffer,
            batcher,
            bus,
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

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/export", get(export_handler))
        .route("/metrics", get(metrics_handler))
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
    if state.supervisor.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn export_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    match state.buffer.export_json() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "application/json")],
            body,
        ),
        Err(error) => {
            tracing::warn!(error = %error, "Tick export failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                "export failed".to_string(),
            )
        }
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

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection = state.supervisor.state();
    let has_recent_data = state.buffer.has_recent_data();

    HealthResponse {
        status: determine_health_status(connection, has_recent_data),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed: FeedStatus {
            state: connection.as_str(),
            connected: connection.is_connected(),
            has_recent_data,
        },
        buffer: BufferStatus {
            display_len: state.buffer.display_len(),
            export_len: state.buffer.export_len(),
            latest: state.buffer.latest(),
        },
        batcher: state.batcher.status(),
        events: state.bus.stats(),
    }
}

const fn determine_health_status(connection: ConnectionState, has_recent_data: bool) -> HealthStatus {
    match connection {
        ConnectionState::Connected if has_recent_data => HealthStatus::Healthy,
        ConnectionState::Connected | ConnectionState::Connecting => HealthStatus::Degraded,
        ConnectionState::Disconnected | ConnectionState::Errored => HealthStatus::Unhealthy,
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
