//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the tick pipeline reaches external systems.

/// Port interfaces for external systems (trainer, epoch store).
pub mod ports;

/// Application services: tick buffering and epoch batching.
pub mod services;
