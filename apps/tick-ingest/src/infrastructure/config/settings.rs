//! Pipeline Configuration Settings
//!
//! Configuration types for the tick ingest pipeline, loaded from
//! environment variables.

use std::time::Duration;

use crate::application::services::{
    DEFAULT_DISPLAY_CAPACITY, DEFAULT_EXPORT_CAPACITY, DEFAULT_TRAINING_TIMEOUT,
};
use crate::domain::epoch::{BatchSize, UserId};
use crate::domain::subscription::Subscription;

/// Default feed endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://ws.binaryws.com/websockets/v3?app_id=1089";

/// Default symbol subscribed to on connect.
pub const DEFAULT_FEED_SYMBOL: &str = "R_10";

/// Feed endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// WebSocket URL.
    pub url: String,
    /// Subscription sent after every successful connect.
    pub subscription: Subscription,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            subscription: Subscription::ticks(DEFAULT_FEED_SYMBOL),
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Time allowed for any inbound frame after a ping.
    pub pong_timeout: Duration,
    /// Interval between liveness checks.
    pub liveness_interval: Duration,
    /// Silence after which an open connection is considered stale.
    pub idle_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to reconnection delays (0 = none).
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(5_000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 1.5,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 10,
        }
    }
}

/// Tick buffer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSettings {
    /// Capacity of the display window.
    pub display_capacity: usize,
    /// Capacity of the export window.
    pub export_capacity: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            display_capacity: DEFAULT_DISPLAY_CAPACITY,
            export_capacity: DEFAULT_EXPORT_CAPACITY,
        }
    }
}

/// Epoch batching settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchingSettings {
    /// Ticks per training batch.
    pub batch_size: BatchSize,
    /// Limit on a single training call.
    pub training_timeout: Duration,
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            batch_size: BatchSize::default(),
            training_timeout: DEFAULT_TRAINING_TIMEOUT,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Owner of the collected epochs.
    pub user_id: UserId,
    /// Feed endpoint.
    pub feed: FeedSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Tick buffer settings.
    pub buffer: BufferSettings,
    /// Epoch batching settings.
    pub batching: BatchingSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl PipelineConfig {
    /// Create configuration with defaults for everything but the user.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            feed: FeedSettings::default(),
            websocket: WebSocketSettings::default(),
            buffer: BufferSettings::default(),
            batching: BatchingSettings::default(),
            server: ServerSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `TICK_USER_ID` is missing or empty, or if the
    /// batch size or subscription override is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`PipelineConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user_id = lookup("TICK_USER_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("TICK_USER_ID".to_string()))?;
        if user_id.trim().is_empty() {
            return Err(ConfigError::EmptyValue("TICK_USER_ID".to_string()));
        }

        let url = lookup("TICK_FEED_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FEED_URL.to_string());

        let subscription = match lookup("TICK_FEED_SUBSCRIPTION") {
            Some(raw) => Subscription::from_json(&raw).map_err(|e| ConfigError::InvalidValue {
                key: "TICK_FEED_SUBSCRIPTION".to_string(),
                message: e.to_string(),
            })?,
            None => Subscription::ticks(
                &lookup("TICK_FEED_SYMBOL").unwrap_or_else(|| DEFAULT_FEED_SYMBOL.to_string()),
            ),
        };

        let batch_size = match lookup("TICK_BATCH_SIZE") {
            Some(raw) => {
                let size = raw.trim().parse::<usize>().map_err(|e| ConfigError::InvalidValue {
                    key: "TICK_BATCH_SIZE".to_string(),
                    message: e.to_string(),
                })?;
                BatchSize::new(size).map_err(|e| ConfigError::InvalidValue {
                    key: "TICK_BATCH_SIZE".to_string(),
                    message: e.to_string(),
                })?
            }
            None => BatchSize::default(),
        };

        let ws_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: parse_duration_secs(
                &lookup,
                "TICK_HEARTBEAT_INTERVAL_SECS",
                ws_defaults.heartbeat_interval,
            ),
            pong_timeout: parse_duration_secs(
                &lookup,
                "TICK_PONG_TIMEOUT_SECS",
                ws_defaults.pong_timeout,
            ),
            liveness_interval: parse_duration_secs(
                &lookup,
                "TICK_LIVENESS_INTERVAL_SECS",
                ws_defaults.liveness_interval,
            ),
            idle_timeout: parse_duration_secs(
                &lookup,
                "TICK_IDLE_TIMEOUT_SECS",
                ws_defaults.idle_timeout,
            ),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "TICK_RECONNECT_DELAY_INITIAL_MS",
                ws_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "TICK_RECONNECT_DELAY_MAX_SECS",
                ws_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "TICK_RECONNECT_DELAY_MULTIPLIER",
                ws_defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: parse_or(&lookup, "TICK_RECONNECT_JITTER", ws_defaults.reconnect_jitter),
            max_reconnect_attempts: parse_or(
                &lookup,
                "TICK_MAX_RECONNECT_ATTEMPTS",
                ws_defaults.max_reconnect_attempts,
            ),
        };

        let buffer_defaults = BufferSettings::default();
        let buffer = BufferSettings {
            display_capacity: parse_or(
                &lookup,
                "TICK_DISPLAY_CAPACITY",
                buffer_defaults.display_capacity,
            ),
            export_capacity: parse_or(
                &lookup,
                "TICK_EXPORT_CAPACITY",
                buffer_defaults.export_capacity,
            ),
        };

        let server = ServerSettings {
            health_port: parse_or(&lookup, "TICK_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            user_id: UserId::new(user_id.trim()),
            feed: FeedSettings { url, subscription },
            websocket,
            buffer,
            batching: BatchingSettings {
                batch_size,
                training_timeout: parse_duration_secs(
                    &lookup,
                    "TICK_TRAINING_TIMEOUT_SECS",
                    DEFAULT_TRAINING_TIMEOUT,
                ),
            },
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed or is out of range.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why it was rejected.
        message: String,
    },
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .map_or(default, Duration::from_millis)
}
