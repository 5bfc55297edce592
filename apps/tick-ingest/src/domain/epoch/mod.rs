//! Epoch Types
//!
//! Types describing fixed-size training batches and the durable records
//! produced when a batch trains successfully.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Smallest accepted batch size.
pub const MIN_BATCH_SIZE: usize = 10;

/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Batch size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 100;

// =============================================================================
// Batch Size
// =============================================================================

/// Number of ticks per training epoch, validated to
/// [`MIN_BATCH_SIZE`]`..=`[`MAX_BATCH_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BatchSize(usize);

impl BatchSize {
    /// Validate and wrap a batch size.
    ///
    /// # Errors
    ///
    /// Returns [`BatchSizeError::OutOfRange`] outside the accepted range.
    pub const fn new(size: usize) -> Result<Self, BatchSizeError> {
        if size < MIN_BATCH_SIZE || size > MAX_BATCH_SIZE {
            return Err(BatchSizeError::OutOfRange {
                size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(Self(size))
    }

    /// Get the raw size.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        Self(DEFAULT_BATCH_SIZE)
    }
}

impl fmt::Display for BatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for batch size validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BatchSizeError {
    /// Size was outside the accepted range.
    #[error("batch size {size} is outside the accepted range {min}..={max}")]
    OutOfRange {
        /// Rejected size.
        size: usize,
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },
}

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of the user who owns collected epochs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned identifier of a persisted epoch.
pub type EpochId = Uuid;

// =============================================================================
// Training Outcome & Epoch Record
// =============================================================================

/// Result of a successful training pass over one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingOutcome {
    /// Loss reported by the trainer.
    pub loss: f64,
    /// Accuracy reported by the trainer.
    pub accuracy: f64,
    /// Wall-clock training time in milliseconds.
    pub duration_millis: u64,
    /// Opaque serialized model state.
    pub model_state: serde_json::Value,
}

/// Durable record of a successfully trained epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochRecord {
    /// Monotonic, gap-free epoch number (starting after the stored count).
    pub epoch_number: u64,
    /// Number of ticks in the batch.
    pub batch_size: usize,
    /// Training loss.
    pub loss: f64,
    /// Training accuracy.
    pub accuracy: f64,
    /// Training duration in milliseconds.
    pub training_duration_millis: u64,
    /// Opaque serialized model state.
    pub model_state: serde_json::Value,
    /// When the epoch was committed.
    pub completed_at: DateTime<Utc>,
    /// Owner of the epoch.
    pub user_id: UserId,
}

impl EpochRecord {
    /// Build a record from a training outcome.
    #[must_use]
    pub fn from_outcome(
        epoch_number: u64,
        batch_size: usize,
        outcome: TrainingOutcome,
        user_id: UserId,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            epoch_number,
            batch_size,
            loss: outcome.loss,
            accuracy: outcome.accuracy,
            training_duration_millis: outcome.duration_millis,
            model_state: outcome.model_state,
            completed_at,
            user_id,
        }
    }
}

// =============================================================================
// Collection Settings
// =============================================================================

/// Per-user collection settings persisted whenever the batcher is
/// started, stopped, or resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSettings {
    /// Whether collection is active.
    pub enabled: bool,
    /// Target batch size.
    pub batch_size: BatchSize,
}
