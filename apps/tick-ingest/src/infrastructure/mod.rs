//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the feed connection itself.

/// Feed WebSocket transport, codec and connection supervisor.
pub mod feed;

/// In-process event bus for feed events.
pub mod events;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-memory epoch store.
pub mod persistence;

/// Built-in training backend.
pub mod training;

/// OpenTelemetry tracing integration.
pub mod telemetry;
