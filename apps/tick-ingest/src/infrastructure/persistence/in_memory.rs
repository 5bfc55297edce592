//! In-memory epoch store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{EpochStorePort, StoreError};
use crate::domain::epoch::{CollectionSettings, EpochId, EpochRecord, UserId};
use crate::domain::tick::Tick;

#[derive(Debug, Default)]
struct StoreState {
    epochs: Vec<(EpochId, EpochRecord)>,
    ticks: HashMap<EpochId, Vec<Tick>>,
    settings: HashMap<UserId, CollectionSettings>,
    prior_epochs: HashMap<UserId, u64>,
}

/// In-memory implementation of `EpochStorePort`.
///
/// Suitable for testing and development. Not for production use.
#[derive(Debug, Default)]
pub struct InMemoryEpochStore {
    state: RwLock<StoreState>,
}

impl InMemoryEpochStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that reports `count` epochs already stored for `user_id`.
    #[must_use]
    pub fn with_existing_epochs(user_id: &UserId, count: u64) -> Self {
        let store = Self::new();
        store.state.write().prior_epochs.insert(user_id.clone(), count);
        store
    }

    /// All epoch records inserted so far, in insertion order.
    #[must_use]
    pub fn epochs(&self) -> Vec<EpochRecord> {
        self.state
            .read()
            .epochs
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Ticks stored for the epoch with the given number.
    #[must_use]
    pub fn ticks_for_epoch(&self, epoch_number: u64) -> Option<Vec<Tick>> {
        let state = self.state.read();
        let (id, _) = state
            .epochs
            .iter()
            .find(|(_, record)| record.epoch_number == epoch_number)?;
        state.ticks.get(id).cloned()
    }

    /// Latest collection settings for a user.
    #[must_use]
    pub fn settings_for(&self, user_id: &UserId) -> Option<CollectionSettings> {
        self.state.read().settings.get(user_id).copied()
    }

    /// Get the number of stored epochs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().epochs.len()
    }

    /// Check if no epochs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().epochs.is_empty()
    }
}

#[async_trait]
impl EpochStorePort for InMemoryEpochStore {
    async fn insert_epoch(&self, record: &EpochRecord) -> Result<EpochId, StoreError> {
        let id = EpochId::new_v4();
        self.state.write().epochs.push((id, record.clone()));
        Ok(id)
    }

    async fn insert_epoch_ticks(
        &self,
        epoch_id: EpochId,
        ticks: &[Tick],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.epochs.iter().any(|(id, _)| *id == epoch_id) {
            return Err(StoreError::WriteFailed {
                message: format!("unknown epoch {epoch_id}"),
            });
        }
        state.ticks.insert(epoch_id, ticks.to_vec());
        Ok(())
    }

    async fn available_epoch_count(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let state = self.state.read();
        let prior = state.prior_epochs.get(user_id).copied().unwrap_or(0);
        let stored = state
            .epochs
            .iter()
            .filter(|(_, record)| &record.user_id == user_id)
            .count();
        Ok(prior + stored as u64)
    }

    async fn upsert_collection_settings(
        &self,
        user_id: &UserId,
        settings: CollectionSettings,
    ) -> Result<(), StoreError> {
        self.state.write().settings.insert(user_id.clone(), settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::epoch::{BatchSize, TrainingOutcome};
    use chrono::Utc;

    fn record(user: &str, number: u64) -> EpochRecord {
        EpochRecord::from_outcome(
            number,
            10,
            TrainingOutcome {
                loss: 0.0,
                accuracy: 0.0,
                duration_millis: 0,
                model_state: serde_json::Value::Null,
            },
            UserId::new(user),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn counts_epochs_per_user() {
        let alice = UserId::new("alice");
        let store = InMemoryEpochStore::with_existing_epochs(&alice, 3);

        store.insert_epoch(&record("alice", 4)).await.unwrap();
        store.insert_epoch(&record("bob", 1)).await.unwrap();

        assert_eq!(store.available_epoch_count(&alice).await.unwrap(), 4);
        assert_eq!(
            store
                .available_epoch_count(&UserId::new("bob"))
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn stores_ticks_by_epoch() {
        let store = InMemoryEpochStore::new();
        let id = store.insert_epoch(&record("alice", 1)).await.unwrap();
        let ticks = vec![Tick::new(1, 1.0, "R_10").unwrap()];

        store.insert_epoch_ticks(id, &ticks).await.unwrap();

        assert_eq!(store.ticks_for_epoch(1), Some(ticks));
        assert!(store.ticks_for_epoch(2).is_none());
    }

    #[tokio::test]
    async fn rejects_ticks_for_unknown_epoch() {
        let store = InMemoryEpochStore::new();
        let result = store.insert_epoch_ticks(EpochId::new_v4(), &[]).await;
        assert!(matches!(result, Err(StoreError::WriteFailed { .. })));
    }

    #[tokio::test]
    async fn upsert_replaces_settings() {
        let store = InMemoryEpochStore::new();
        let user = UserId::new("alice");
        let first = CollectionSettings {
            enabled: true,
            batch_size: BatchSize::default(),
        };
        let second = CollectionSettings {
            enabled: false,
            ..first
        };

        store.upsert_collection_settings(&user, first).await.unwrap();
        store.upsert_collection_settings(&user, second).await.unwrap();

        assert_eq!(store.settings_for(&user), Some(second));
    }
}
