//! Domain Layer - Core tick pipeline types.
//!
//! This layer contains the core domain types for tick ingestion and
//! epoch batching. Types here carry no I/O and only depend on
//! serialization and time crates.

/// Canonical tick observations.
pub mod tick;

/// Opaque feed subscription requests.
pub mod subscription;

/// Feed connection lifecycle states.
pub mod connection;

/// Training epoch records, batch sizing, and collection settings.
pub mod epoch;
