#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Tick Ingest - Live Market Tick Pipeline
//!
//! Keeps one supervised WebSocket connection to a tick feed alive,
//! normalizes whatever tick shape the feed speaks, and fans the ticks out
//! to a bounded display/export buffer and an epoch batcher that trains on
//! fixed-size batches.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `tick`: the canonical tick and its rounding rules
//!   - `subscription`: the opaque subscription request
//!   - `connection`: connection lifecycle states
//!   - `epoch`: batch sizes, training outcomes, epoch records
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: trainer and epoch store interfaces
//!   - `services`: tick buffer and epoch batcher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: transport, codec, heartbeat, backoff, connection supervisor
//!   - `events`: in-process event bus
//!   - `config`, `health`, `metrics`, `telemetry`
//!   - `persistence`, `training`: in-memory store and reference trainer
//!
//! # Data Flow
//!
//! ```text
//!                  ┌────────────┐    ┌──────────┐    ┌─────────────┐
//! Feed WS ────────►│ Supervisor │───►│ EventBus │─┬─►│ TickBuffer  │
//!   ▲   (frames)   │ + codec    │    └──────────┘ │  └─────────────┘
//!   │              └────────────┘                 │  ┌─────────────┐   ┌─────────┐
//!   └── ping / subscription / reconnect           └─►│ EpochBatcher│──►│ Trainer │
//!                                                    └──────┬──────┘   └─────────┘
//!                                                           ▼
//!                                                      EpochStore
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::epoch::{BatchSize, BatchSizeError, CollectionSettings, EpochRecord, UserId};
pub use domain::subscription::Subscription;
pub use domain::tick::Tick;

// Application services
pub use application::services::{
    BatcherConfig, BatcherEvent, BatcherStatus, EpochBatcher, TickBuffer, TickBufferConfig,
};

// Infrastructure config
pub use infrastructure::config::{
    BatchingSettings, BufferSettings, ConfigError, FeedSettings, PipelineConfig, ServerSettings,
    WebSocketSettings,
};

// Event bus
pub use infrastructure::events::{EventBus, EventKind, FeedEvent, SharedEventBus};

// Feed connection
pub use infrastructure::feed::{
    ConnectionSupervisor, EnvironmentSignal, SupervisorConfig, SupervisorError, SupervisorHandle,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
