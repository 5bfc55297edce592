//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Connection**: state gauge, connect attempts, reconnects, heartbeat failures
//! - **Frames**: frames received, ticks normalized by shape, frames dropped
//! - **Epochs**: batches frozen, epochs completed and failed, training duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::infrastructure::events::FeedErrorKind;
use crate::infrastructure::feed::codec::WireShape;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Connection
    describe_gauge!(
        "tick_ingest_connection_state",
        "Feed connection state (0=disconnected, 1=connecting, 2=connected, 3=error)"
    );
    describe_counter!(
        "tick_ingest_connect_attempts_total",
        "Total feed connection attempts"
    );
    describe_counter!(
        "tick_ingest_connections_total",
        "Total successful feed connections"
    );
    describe_counter!(
        "tick_ingest_reconnects_total",
        "Total scheduled reconnection attempts"
    );
    describe_counter!(
        "tick_ingest_reconnects_exhausted_total",
        "Times reconnection gave up"
    );
    describe_counter!(
        "tick_ingest_heartbeat_timeouts_total",
        "Connections dropped for missing heartbeat replies"
    );
    describe_counter!(
        "tick_ingest_stale_connections_total",
        "Connections dropped by the liveness check"
    );
    describe_counter!("tick_ingest_errors_total", "Feed errors by source");

    // Frames
    describe_counter!(
        "tick_ingest_frames_received_total",
        "Total text frames received from the feed"
    );
    describe_counter!(
        "tick_ingest_ticks_total",
        "Total ticks normalized, by wire shape"
    );
    describe_counter!(
        "tick_ingest_frames_dropped_total",
        "Frames or ticks dropped, by reason"
    );

    // Epochs
    describe_counter!(
        "tick_ingest_batches_frozen_total",
        "Batches handed to training"
    );
    describe_histogram!("tick_ingest_batch_size", "Ticks per frozen batch");
    describe_counter!(
        "tick_ingest_epochs_completed_total",
        "Training epochs completed"
    );
    describe_counter!("tick_ingest_epochs_failed_total", "Training epochs failed");
    describe_histogram!(
        "tick_ingest_training_duration_seconds",
        "Time spent in the training backend per epoch"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Errored => 3.0,
    }
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("tick_ingest_connection_state").set(state_value(state));
}

/// Record a connection attempt.
pub fn record_connect_attempt() {
    counter!("tick_ingest_connect_attempts_total").increment(1);
}

/// Record a successful connection.
pub fn record_connected() {
    counter!("tick_ingest_connections_total").increment(1);
}

/// Record a scheduled reconnection.
pub fn record_reconnect_scheduled() {
    counter!("tick_ingest_reconnects_total").increment(1);
}

/// Record that reconnection gave up.
pub fn record_reconnect_exhausted() {
    counter!("tick_ingest_reconnects_exhausted_total").increment(1);
}

/// Record a heartbeat timeout.
pub fn record_heartbeat_timeout() {
    counter!("tick_ingest_heartbeat_timeouts_total").increment(1);
}

/// Record a connection dropped as stale.
pub fn record_stale_connection() {
    counter!("tick_ingest_stale_connections_total").increment(1);
}

/// Record a feed error.
pub fn record_error(kind: FeedErrorKind) {
    counter!("tick_ingest_errors_total", "source" => kind.as_str()).increment(1);
}

/// Record a text frame received.
pub fn record_frame_received() {
    counter!("tick_ingest_frames_received_total").increment(1);
}

/// Record a normalized tick.
pub fn record_tick(shape: WireShape) {
    counter!("tick_ingest_ticks_total", "shape" => shape.as_str()).increment(1);
}

/// Record a dropped frame or tick.
pub fn record_frame_dropped(reason: &'static str) {
    counter!("tick_ingest_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record a batch handed to training.
#[allow(clippy::cast_precision_loss)]
pub fn record_batch_frozen(len: usize) {
    counter!("tick_ingest_batches_frozen_total").increment(1);
    histogram!("tick_ingest_batch_size").record(len as f64);
}

/// Record a completed epoch and its training time.
pub fn record_epoch_completed(duration: Duration) {
    counter!("tick_ingest_epochs_completed_total").increment(1);
    histogram!("tick_ingest_training_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed epoch.
pub fn record_epoch_failed() {
    counter!("tick_ingest_epochs_failed_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
