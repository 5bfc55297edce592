//! Epoch Store Port (Driven Port)
//!
//! Interface for persisting trained epochs and per-user collection
//! settings.

use async_trait::async_trait;

use crate::domain::epoch::{CollectionSettings, EpochId, EpochRecord, UserId};
use crate::domain::tick::Tick;

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Connection error.
    #[error("Store connection error: {message}")]
    ConnectionError { message: String },

    /// A write was rejected.
    #[error("Store write failed: {message}")]
    WriteFailed { message: String },

    /// A read failed.
    #[error("Store query failed: {message}")]
    QueryFailed { message: String },
}

/// Port for epoch persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EpochStorePort: Send + Sync {
    /// Insert an epoch record and return its store id.
    async fn insert_epoch(&self, record: &EpochRecord) -> Result<EpochId, StoreError>;

    /// Insert the ticks that made up an epoch.
    async fn insert_epoch_ticks(&self, epoch_id: EpochId, ticks: &[Tick])
    -> Result<(), StoreError>;

    /// Number of epochs already stored for a user. Seeds the epoch counter.
    async fn available_epoch_count(&self, user_id: &UserId) -> Result<u64, StoreError>;

    /// Insert or update a user's collection settings.
    async fn upsert_collection_settings(
        &self,
        user_id: &UserId,
        settings: CollectionSettings,
    ) -> Result<(), StoreError>;
}
