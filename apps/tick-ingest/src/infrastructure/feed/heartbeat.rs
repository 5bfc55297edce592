//! Heartbeat & Liveness Tracking
//!
//! Tracks connection health for the supervisor: an application-level ping
//! is sent every `ping_interval`, and if no inbound traffic arrives within
//! `pong_timeout` afterwards the connection is considered dead. Separately,
//! a liveness check every `liveness_interval` flags a connection that has
//! been silent for longer than `idle_timeout`.
//!
//! The state here is plain data owned by the supervisor task; the timers
//! themselves live in the supervisor's select loop.

use std::time::Duration;

use tokio::time::Instant;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Timeout for any inbound frame after a ping.
    pub pong_timeout: Duration,
    /// Interval between liveness checks.
    pub liveness_interval: Duration,
    /// Silence after which an open connection is treated as stale.
    pub idle_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.pong_timeout,
            liveness_interval: settings.liveness_interval,
            idle_timeout: settings.idle_timeout,
        }
    }
}

/// Per-connection heartbeat state.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    last_inbound: Instant,
    pong_deadline: Option<Instant>,
}

impl HeartbeatState {
    /// Create state for a connection opened at `now`.
    #[must_use]
    pub const fn new(now: Instant) -> Self {
        Self {
            last_inbound: now,
            pong_deadline: None,
        }
    }

    /// Record that a ping was sent. Arms the pong deadline unless one is
    /// already pending.
    pub fn mark_ping_sent(&mut self, now: Instant, pong_timeout: Duration) {
        if self.pong_deadline.is_none() {
            self.pong_deadline = Some(now + pong_timeout);
        }
    }

    /// Record inbound traffic. Any frame counts as a pong.
    pub const fn record_inbound(&mut self, now: Instant) {
        self.last_inbound = now;
        self.pong_deadline = None;
    }

    /// Deadline by which inbound traffic must arrive, if a ping is pending.
    #[must_use]
    pub const fn pong_deadline(&self) -> Option<Instant> {
        self.pong_deadline
    }

    /// Check if we're currently waiting for a pong.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.pong_deadline.is_some()
    }

    /// Disarm the pong deadline.
    pub const fn clear_pong_deadline(&mut self) {
        self.pong_deadline = None;
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_inbound(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_inbound)
    }

    /// Whether the connection has been silent for longer than `idle_timeout`.
    #[must_use]
    pub fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.time_since_inbound(now) > idle_timeout
    }

    /// Reset state for a new connection.
    pub const fn reset(&mut self, now: Instant) {
        self.last_inbound = now;
        self.pong_deadline = None;
    }
}

/// Error type for heartbeat operations.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// No inbound traffic after a ping.
    #[error("heartbeat timeout after {0:?}")]
    Timeout(Duration),
    /// No inbound traffic for the idle window.
    #[error("connection idle for {0:?}")]
    Idle(Duration),
}
