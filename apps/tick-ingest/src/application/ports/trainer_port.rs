//! Trainer Port (Driven Port)
//!
//! Interface to the model that consumes frozen batches.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::epoch::TrainingOutcome;

/// Training error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrainingError {
    /// The batch could not be trained on (too short, degenerate, etc.).
    #[error("Training rejected batch: {message}")]
    Rejected { message: String },

    /// The training backend failed or was unreachable.
    #[error("Training backend failed: {message}")]
    BackendFailed { message: String },

    /// Training did not finish within the allowed time.
    #[error("Training timed out after {after:?}")]
    TimedOut { after: Duration },
}

/// Port for training on a batch of tick values.
///
/// The input is the ordered value sequence of one frozen batch. A failure
/// is recoverable: the caller decides what to keep of the batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrainerPort: Send + Sync {
    /// Train on one batch.
    async fn train(&self, values: Vec<f64>) -> Result<TrainingOutcome, TrainingError>;
}
