//! Epoch Batcher
//!
//! Accumulates live ticks into fixed-size batches, hands each frozen batch
//! to the trainer without blocking ingestion, and commits the results as
//! numbered epochs.
//!
//! # Ordering
//!
//! Training runs concurrently, but a single commit task owns the epoch
//! counter. Results are held back until every earlier batch has resolved,
//! so epoch numbers follow freeze order and are assigned only on success.
//!
//! # Failure Recovery
//!
//! When training fails, the first half of the batch is discarded and the
//! second half is put back in front of the live accumulator. If the
//! batcher was reset or restarted while the batch was training, the
//! retained half is dropped instead.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EpochStorePort, StoreError, TrainerPort, TrainingError};
use crate::domain::connection::ConnectionState;
use crate::domain::epoch::{
    BatchSize, BatchSizeError, CollectionSettings, EpochRecord, TrainingOutcome, UserId,
};
use crate::domain::tick::Tick;
use crate::infrastructure::metrics;

/// Default capacity of the batcher event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default limit on a single training call.
pub const DEFAULT_TRAINING_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Public Types
// =============================================================================

/// Configuration for the epoch batcher.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Owner of the produced epochs.
    pub user_id: UserId,
    /// Initial batch size.
    pub batch_size: BatchSize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Longest a training call may run before the batch counts as failed.
    pub training_timeout: Duration,
}

impl BatcherConfig {
    /// Create a configuration with the default event capacity and
    /// training timeout.
    #[must_use]
    pub const fn new(user_id: UserId, batch_size: BatchSize) -> Self {
        Self {
            user_id,
            batch_size,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            training_timeout: DEFAULT_TRAINING_TIMEOUT,
        }
    }

    /// Override the training timeout.
    #[must_use]
    pub const fn with_training_timeout(mut self, timeout: Duration) -> Self {
        self.training_timeout = timeout;
        self
    }
}

/// Point-in-time view of the batcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatcherStatus {
    /// Whether ticks are being accumulated.
    pub active: bool,
    /// Whether any frozen batch is still training.
    pub is_processing: bool,
    /// Ticks in the accumulator.
    pub current_count: usize,
    /// Size at which the accumulator freezes.
    pub target_count: usize,
    /// Accumulator fill, 0 to 100.
    pub progress: f64,
    /// Last assigned epoch number.
    pub epochs_completed: u64,
}

/// Outcome notifications for resolved batches.
#[derive(Debug, Clone)]
pub enum BatcherEvent {
    /// A batch trained successfully and was committed.
    EpochCompleted(EpochRecord),
    /// A batch failed to train.
    EpochFailed {
        /// Freeze sequence of the failed batch.
        sequence: u64,
        /// Trainer error.
        error: TrainingError,
        /// Ticks dropped from the front of the batch.
        discarded: usize,
        /// Ticks put back into the accumulator.
        retained: usize,
    },
}

/// Error type for batcher construction.
#[derive(Debug, thiserror::Error)]
pub enum BatcherError {
    /// The stored epoch count could not be read.
    #[error("failed to seed epoch counter: {0}")]
    Seed(#[from] StoreError),
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug)]
struct FrozenBatch {
    sequence: u64,
    generation: u64,
    ticks: Vec<Tick>,
}

#[derive(Debug)]
struct TrainedBatch {
    batch: FrozenBatch,
    result: Result<TrainingOutcome, TrainingError>,
    elapsed: Duration,
}

#[derive(Debug)]
struct BatchState {
    active: bool,
    feed_connected: bool,
    batch_size: BatchSize,
    pending_batch_size: Option<BatchSize>,
    accumulator: Vec<Tick>,
    generation: u64,
    next_sequence: u64,
    in_flight: usize,
    epoch_counter: u64,
}

impl BatchState {
    fn new(batch_size: BatchSize, epoch_counter: u64) -> Self {
        Self {
            active: false,
            feed_connected: true,
            batch_size,
            pending_batch_size: None,
            accumulator: Vec::with_capacity(batch_size.get()),
            generation: 0,
            next_sequence: 0,
            in_flight: 0,
            epoch_counter,
        }
    }

    /// Freeze every full batch at the front of the accumulator.
    fn freeze_ready(&mut self) -> Vec<FrozenBatch> {
        let mut frozen = Vec::new();
        while self.accumulator.len() >= self.batch_size.get() {
            let rest = self.accumulator.split_off(self.batch_size.get());
            let ticks = std::mem::replace(&mut self.accumulator, rest);
            frozen.push(FrozenBatch {
                sequence: self.next_sequence,
                generation: self.generation,
                ticks,
            });
            self.next_sequence += 1;
            self.in_flight += 1;
            if let Some(next) = self.pending_batch_size.take() {
                self.batch_size = next;
            }
        }
        frozen
    }

    /// A new size applies immediately to an empty accumulator, otherwise
    /// from the next batch on.
    fn request_batch_size(&mut self, size: BatchSize) {
        if self.accumulator.is_empty() {
            self.batch_size = size;
            self.pending_batch_size = None;
        } else if size == self.batch_size {
            self.pending_batch_size = None;
        } else {
            self.pending_batch_size = Some(size);
        }
    }

    fn target_size(&self) -> BatchSize {
        self.pending_batch_size.unwrap_or(self.batch_size)
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.accumulator.clear();
        if let Some(next) = self.pending_batch_size.take() {
            self.batch_size = next;
        }
    }

    fn status(&self) -> BatcherStatus {
        let current_count = self.accumulator.len();
        let target_count = self.batch_size.get();
        #[allow(clippy::cast_precision_loss)]
        let progress = (current_count as f64 / target_count as f64 * 100.0).min(100.0);

        BatcherStatus {
            active: self.active,
            is_processing: self.in_flight > 0,
            current_count,
            target_count,
            progress,
            epochs_completed: self.epoch_counter,
        }
    }
}

// =============================================================================
// Epoch Batcher
// =============================================================================

/// Fixed-size tick batcher with ordered, gap-free epoch commits.
pub struct EpochBatcher {
    user_id: UserId,
    trainer: Arc<dyn TrainerPort>,
    training_timeout: Duration,
    store: Arc<dyn EpochStorePort>,
    state: Mutex<BatchState>,
    results_tx: mpsc::UnboundedSender<TrainedBatch>,
    status_tx: watch::Sender<BatcherStatus>,
    events_tx: broadcast::Sender<BatcherEvent>,
    runtime: Handle,
    cancel: CancellationToken,
}

impl std::fmt::Debug for EpochBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochBatcher")
            .field("user_id", &self.user_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl EpochBatcher {
    /// Create the batcher and spawn its commit task.
    ///
    /// The epoch counter is seeded from the store's existing epoch count
    /// for the configured user. The batcher starts inactive.
    ///
    /// # Errors
    ///
    /// Returns [`BatcherError::Seed`] if the stored count cannot be read.
    pub async fn spawn(
        config: BatcherConfig,
        trainer: Arc<dyn TrainerPort>,
        store: Arc<dyn EpochStorePort>,
    ) -> Result<Arc<Self>, BatcherError> {
        let seed = store.available_epoch_count(&config.user_id).await?;
        let state = BatchState::new(config.batch_size, seed);
        let (status_tx, _) = watch::channel(state.status());
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        tracing::info!(
            user_id = %config.user_id,
            batch_size = config.batch_size.get(),
            seed_epochs = seed,
            training_timeout_secs = config.training_timeout.as_secs(),
            "Epoch batcher ready"
        );

        let batcher = Arc::new(Self {
            user_id: config.user_id,
            trainer,
            training_timeout: config.training_timeout,
            store,
            state: Mutex::new(state),
            results_tx,
            status_tx,
            events_tx,
            runtime: Handle::current(),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&batcher).commit_loop(results_rx));

        Ok(batcher)
    }

    // -------------------------------------------------------------------------
    // Controls
    // -------------------------------------------------------------------------

    /// Begin accumulating ticks.
    ///
    /// Starting a stopped batcher discards any leftover accumulator and
    /// begins a fresh batch at `batch_size`. Starting an active batcher only
    /// changes the batch size.
    pub fn start(&self, batch_size: BatchSize) {
        let status = {
            let mut state = self.state.lock();
            if state.active {
                state.request_batch_size(batch_size);
            } else {
                state.clear();
                state.batch_size = batch_size;
                state.pending_batch_size = None;
                state.active = true;
            }
            state.status()
        };

        tracing::info!(batch_size = batch_size.get(), "Epoch batching started");
        self.publish_status(status);
        self.persist_settings(CollectionSettings {
            enabled: true,
            batch_size,
        });
    }

    /// Stop accumulating. Batches already training still resolve.
    pub fn stop(&self) {
        let (status, batch_size) = {
            let mut state = self.state.lock();
            state.active = false;
            (state.status(), state.target_size())
        };

        tracing::info!("Epoch batching stopped");
        self.publish_status(status);
        self.persist_settings(CollectionSettings {
            enabled: false,
            batch_size,
        });
    }

    /// Discard the accumulator. Failed batches still training will not
    /// fold their retained half back in.
    pub fn reset(&self) {
        let status = {
            let mut state = self.state.lock();
            state.clear();
            state.status()
        };

        tracing::info!("Epoch accumulator reset");
        self.publish_status(status);
    }

    /// Change the batch size for batches started after this call.
    ///
    /// # Errors
    ///
    /// Returns [`BatchSizeError`] if the size is out of range.
    pub fn set_batch_size(&self, size: usize) -> Result<BatchSize, BatchSizeError> {
        let batch_size = BatchSize::new(size)?;
        let (status, enabled) = {
            let mut state = self.state.lock();
            state.request_batch_size(batch_size);
            (state.status(), state.active)
        };

        tracing::info!(batch_size = size, "Batch size updated");
        self.publish_status(status);
        self.persist_settings(CollectionSettings {
            enabled,
            batch_size,
        });
        Ok(batch_size)
    }

    /// Stop the commit task. Results still training are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // -------------------------------------------------------------------------
    // Inputs
    // -------------------------------------------------------------------------

    /// Feed one normalized tick.
    ///
    /// Ignored while stopped or while the feed is not connected. Freezes and
    /// dispatches any batch that becomes full.
    pub fn on_tick(&self, tick: Tick) {
        let (frozen, status) = {
            let mut state = self.state.lock();
            if !state.active || !state.feed_connected {
                return;
            }
            state.accumulator.push(tick);
            (state.freeze_ready(), state.status())
        };

        self.publish_status(status);
        for batch in frozen {
            self.dispatch(batch);
        }
    }

    /// Track the feed connection. Accumulation pauses unless connected.
    pub fn on_connection_state(&self, connection: ConnectionState) {
        let connected = connection.is_connected();
        let mut state = self.state.lock();
        if state.feed_connected != connected {
            tracing::debug!(
                state = %connection,
                "Epoch accumulation {}",
                if connected { "resumed" } else { "paused" }
            );
            state.feed_connected = connected;
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> BatcherStatus {
        self.state.lock().status()
    }

    /// Watch status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<BatcherStatus> {
        self.status_tx.subscribe()
    }

    /// Receive epoch outcome events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<BatcherEvent> {
        self.events_tx.subscribe()
    }

    /// Ticks currently in the accumulator, oldest first.
    #[must_use]
    pub fn accumulated(&self) -> Vec<Tick> {
        self.state.lock().accumulator.clone()
    }

    /// Batch size that the next frozen batch after the current one will use.
    #[must_use]
    pub fn batch_size(&self) -> BatchSize {
        self.state.lock().target_size()
    }

    /// Owner of produced epochs.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    // -------------------------------------------------------------------------
    // Training & Commit
    // -------------------------------------------------------------------------

    fn dispatch(&self, batch: FrozenBatch) {
        tracing::debug!(
            sequence = batch.sequence,
            size = batch.ticks.len(),
            "Batch frozen, dispatching to trainer"
        );
        metrics::record_batch_frozen(batch.ticks.len());

        let trainer = Arc::clone(&self.trainer);
        let training_timeout = self.training_timeout;
        let results_tx = self.results_tx.clone();
        self.runtime.spawn(async move {
            let values: Vec<f64> = batch.ticks.iter().map(Tick::value).collect();
            let started = Instant::now();
            let training = AssertUnwindSafe(trainer.train(values)).catch_unwind();
            let result = match tokio::time::timeout(training_timeout, training).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(TrainingError::BackendFailed {
                    message: "trainer panicked".to_string(),
                }),
                Err(_) => Err(TrainingError::TimedOut {
                    after: training_timeout,
                }),
            };
            let elapsed = started.elapsed();
            let _ = results_tx.send(TrainedBatch {
                batch,
                result,
                elapsed,
            });
        });
    }

    async fn commit_loop(self: Arc<Self>, mut results_rx: mpsc::UnboundedReceiver<TrainedBatch>) {
        let mut pending: BTreeMap<u64, TrainedBatch> = BTreeMap::new();
        let mut next_sequence = 0u64;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!(pending = pending.len(), "Epoch commit task cancelled");
                    break;
                }
                received = results_rx.recv() => {
                    let Some(trained) = received else { break };
                    pending.insert(trained.batch.sequence, trained);
                    while let Some(ready) = pending.remove(&next_sequence) {
                        next_sequence += 1;
                        self.commit(ready).await;
                    }
                }
            }
        }
    }

    async fn commit(&self, trained: TrainedBatch) {
        let TrainedBatch {
            batch,
            result,
            elapsed,
        } = trained;

        match result {
            Ok(outcome) => self.commit_success(batch, outcome, elapsed).await,
            Err(error) => self.recover_failure(batch, error),
        }
    }

    async fn commit_success(&self, batch: FrozenBatch, outcome: TrainingOutcome, elapsed: Duration) {
        let epoch_number = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.epoch_counter += 1;
            state.epoch_counter
        };

        let record = EpochRecord::from_outcome(
            epoch_number,
            batch.ticks.len(),
            outcome,
            self.user_id.clone(),
            Utc::now(),
        );

        tracing::info!(
            epoch = epoch_number,
            sequence = batch.sequence,
            loss = record.loss,
            accuracy = record.accuracy,
            duration_ms = record.training_duration_millis,
            "Epoch completed"
        );
        metrics::record_epoch_completed(elapsed);

        self.persist_epoch(&record, &batch.ticks).await;
        self.publish_status(self.status());
        let _ = self.events_tx.send(BatcherEvent::EpochCompleted(record));
    }

    fn recover_failure(&self, batch: FrozenBatch, error: TrainingError) {
        let FrozenBatch {
            sequence,
            generation,
            mut ticks,
        } = batch;
        let discarded = ticks.len() / 2;
        let mut retained_ticks = ticks.split_off(discarded);

        let (frozen, status, retained) = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.active && state.generation == generation {
                let retained = retained_ticks.len();
                retained_ticks.append(&mut state.accumulator);
                state.accumulator = retained_ticks;
                (state.freeze_ready(), state.status(), retained)
            } else {
                (Vec::new(), state.status(), 0)
            }
        };

        tracing::warn!(
            sequence,
            error = %error,
            discarded,
            retained,
            "Training failed, keeping second half of batch"
        );
        metrics::record_epoch_failed();

        self.publish_status(status);
        let _ = self.events_tx.send(BatcherEvent::EpochFailed {
            sequence,
            error,
            discarded,
            retained,
        });
        for batch in frozen {
            self.dispatch(batch);
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    async fn persist_epoch(&self, record: &EpochRecord, ticks: &[Tick]) {
        match self.store.insert_epoch(record).await {
            Ok(epoch_id) => {
                if let Err(error) = self.store.insert_epoch_ticks(epoch_id, ticks).await {
                    tracing::warn!(
                        epoch = record.epoch_number,
                        error = %error,
                        "Failed to persist epoch ticks"
                    );
                }
            }
            Err(error) => {
                tracing::warn!(
                    epoch = record.epoch_number,
                    error = %error,
                    "Failed to persist epoch record"
                );
            }
        }
    }

    fn persist_settings(&self, settings: CollectionSettings) {
        let store = Arc::clone(&self.store);
        let user_id = self.user_id.clone();
        self.runtime.spawn(async move {
            if let Err(error) = store.upsert_collection_settings(&user_id, settings).await {
                tracing::warn!(error = %error, "Failed to persist collection settings");
            }
        });
    }

    fn publish_status(&self, status: BatcherStatus) {
        self.status_tx.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::json;

    use crate::application::ports::{MockEpochStorePort, MockTrainerPort};
    use crate::infrastructure::persistence::InMemoryEpochStore;

    #[derive(Default)]
    struct ScriptedTrainer {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        delays: Vec<Duration>,
    }

    #[async_trait]
    impl TrainerPort for ScriptedTrainer {
        async fn train(&self, values: Vec<f64>) -> Result<TrainingOutcome, TrainingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(call) {
                tokio::time::sleep(*delay).await;
            }
            if self.fail_on.contains(&call) {
                return Err(TrainingError::BackendFailed {
                    message: format!("scripted failure on call {call}"),
                });
            }
            Ok(TrainingOutcome {
                loss: 0.1,
                accuracy: 0.5,
                duration_millis: 1,
                model_state: json!({ "first": values.first(), "len": values.len() }),
            })
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn tick(n: usize) -> Tick {
        Tick::new(i64::try_from(n).unwrap(), n as f64, "R_10").unwrap()
    }

    fn config(batch_size: usize) -> BatcherConfig {
        BatcherConfig::new(UserId::new("user-1"), BatchSize::new(batch_size).unwrap())
    }

    async fn next_event(events: &mut broadcast::Receiver<BatcherEvent>) -> BatcherEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("batcher event should arrive")
            .expect("event channel should stay open")
    }

    async fn next_completed(events: &mut broadcast::Receiver<BatcherEvent>) -> EpochRecord {
        match next_event(events).await {
            BatcherEvent::EpochCompleted(record) => record,
            other => panic!("expected completed epoch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn freezes_full_batches_and_numbers_epochs() {
        let store = Arc::new(InMemoryEpochStore::new());
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(ScriptedTrainer::default()),
            store.clone(),
        )
        .await
        .unwrap();
        let mut events = batcher.subscribe_events();
        batcher.start(BatchSize::new(10).unwrap());

        for n in 0..25 {
            batcher.on_tick(tick(n));
        }

        assert_eq!(next_completed(&mut events).await.epoch_number, 1);
        assert_eq!(next_completed(&mut events).await.epoch_number, 2);
        assert_eq!(batcher.status().current_count, 5);
        assert_eq!(store.epochs().len(), 2);
    }

    #[tokio::test]
    async fn epoch_numbers_continue_from_stored_count() {
        let user = UserId::new("user-1");
        let store = Arc::new(InMemoryEpochStore::with_existing_epochs(&user, 4));
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(ScriptedTrainer::default()),
            store,
        )
        .await
        .unwrap();
        let mut events = batcher.subscribe_events();
        batcher.start(BatchSize::new(10).unwrap());
        assert_eq!(batcher.status().epochs_completed, 4);

        for n in 0..10 {
            batcher.on_tick(tick(n));
        }

        assert_eq!(next_completed(&mut events).await.epoch_number, 5);
    }

    #[tokio::test]
    async fn failed_batch_keeps_second_half() {
        let trainer = ScriptedTrainer {
            fail_on: vec![0],
            ..ScriptedTrainer::default()
        };
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(trainer),
            Arc::new(InMemoryEpochStore::new()),
        )
        .await
        .unwrap();
        let mut events = batcher.subscribe_events();
        batcher.start(BatchSize::new(10).unwrap());

        for n in 0..10 {
            batcher.on_tick(tick(n));
        }

        match next_event(&mut events).await {
            BatcherEvent::EpochFailed {
                sequence,
                discarded,
                retained,
                ..
            } => {
                assert_eq!(sequence, 0);
                assert_eq!(discarded, 5);
                assert_eq!(retained, 5);
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let kept: Vec<f64> = batcher.accumulated().iter().map(Tick::value).collect();
        assert_eq!(kept, vec![5.0, 6.0, 7.0, 8.0, 9.0]);

        for n in 10..15 {
            batcher.on_tick(tick(n));
        }

        let record = next_completed(&mut events).await;
        assert_eq!(record.epoch_number, 1);
        assert_eq!(record.model_state["first"], json!(5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn epochs_commit_in_freeze_order() {
        let trainer = ScriptedTrainer {
            delays: vec![Duration::from_millis(300), Duration::from_millis(10)],
            ..ScriptedTrainer::default()
        };
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(trainer),
            Arc::new(InMemoryEpochStore::new()),
        )
        .await
        .unwrap();
        let mut events = batcher.subscribe_events();
        batcher.start(BatchSize::new(10).unwrap());

        for n in 0..20 {
            batcher.on_tick(tick(n));
        }
        assert!(batcher.status().is_processing);

        let first = next_completed(&mut events).await;
        let second = next_completed(&mut events).await;
        assert_eq!(first.epoch_number, 1);
        assert_eq!(first.model_state["first"], json!(0.0));
        assert_eq!(second.epoch_number, 2);
        assert_eq!(second.model_state["first"], json!(10.0));
    }

    /// Never resolves for the batch starting at zero.
    struct StallingTrainer;

    #[async_trait]
    impl TrainerPort for StallingTrainer {
        async fn train(&self, values: Vec<f64>) -> Result<TrainingOutcome, TrainingError> {
            if values.first() == Some(&0.0) {
                std::future::pending::<()>().await;
            }
            Ok(TrainingOutcome {
                loss: 0.1,
                accuracy: 0.5,
                duration_millis: 1,
                model_state: json!({ "first": values.first() }),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_training_times_out_and_later_epochs_commit() {
        let store = Arc::new(InMemoryEpochStore::new());
        let batcher = EpochBatcher::spawn(
            config(10).with_training_timeout(Duration::from_secs(1)),
            Arc::new(StallingTrainer),
            store.clone(),
        )
        .await
        .unwrap();
        let mut events = batcher.subscribe_events();
        batcher.start(BatchSize::new(10).unwrap());

        for n in 0..50 {
            batcher.on_tick(tick(n));
        }

        match next_event(&mut events).await {
            BatcherEvent::EpochFailed {
                sequence, error, ..
            } => {
                assert_eq!(sequence, 0);
                assert!(matches!(error, TrainingError::TimedOut { .. }));
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }

        for (epoch_number, first) in [(1, 10.0), (2, 20.0), (3, 30.0), (4, 40.0)] {
            let record = next_completed(&mut events).await;
            assert_eq!(record.epoch_number, epoch_number);
            assert_eq!(record.model_state["first"], json!(first));
        }

        let status = batcher.status();
        assert!(!status.is_processing);
        assert_eq!(status.epochs_completed, 4);
        assert_eq!(store.epochs().len(), 4);
        let kept: Vec<f64> = batcher.accumulated().iter().map(Tick::value).collect();
        assert_eq!(kept, vec![5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[tokio::test]
    async fn stopped_batcher_ignores_ticks() {
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(ScriptedTrainer::default()),
            Arc::new(InMemoryEpochStore::new()),
        )
        .await
        .unwrap();

        batcher.on_tick(tick(0));
        assert_eq!(batcher.status().current_count, 0);

        batcher.start(BatchSize::new(10).unwrap());
        batcher.on_tick(tick(1));
        batcher.stop();
        batcher.on_tick(tick(2));

        let status = batcher.status();
        assert!(!status.active);
        assert_eq!(status.current_count, 1);
    }

    #[tokio::test]
    async fn restart_discards_leftover_accumulator() {
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(ScriptedTrainer::default()),
            Arc::new(InMemoryEpochStore::new()),
        )
        .await
        .unwrap();

        batcher.start(BatchSize::new(10).unwrap());
        for n in 0..4 {
            batcher.on_tick(tick(n));
        }
        batcher.stop();
        batcher.start(BatchSize::new(20).unwrap());

        let status = batcher.status();
        assert_eq!(status.current_count, 0);
        assert_eq!(status.target_count, 20);
    }

    #[tokio::test]
    async fn accumulation_pauses_while_feed_disconnected() {
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(ScriptedTrainer::default()),
            Arc::new(InMemoryEpochStore::new()),
        )
        .await
        .unwrap();
        batcher.start(BatchSize::new(10).unwrap());

        batcher.on_tick(tick(0));
        batcher.on_connection_state(ConnectionState::Disconnected);
        batcher.on_tick(tick(1));
        batcher.on_connection_state(ConnectionState::Connected);
        batcher.on_tick(tick(2));

        let kept: Vec<f64> = batcher.accumulated().iter().map(Tick::value).collect();
        assert_eq!(kept, vec![0.0, 2.0]);
    }

    #[tokio::test]
    async fn batch_size_change_applies_to_next_batch() {
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(ScriptedTrainer::default()),
            Arc::new(InMemoryEpochStore::new()),
        )
        .await
        .unwrap();
        let mut events = batcher.subscribe_events();
        batcher.start(BatchSize::new(10).unwrap());

        for n in 0..3 {
            batcher.on_tick(tick(n));
        }
        batcher.set_batch_size(20).unwrap();
        assert_eq!(batcher.status().target_count, 10);
        assert_eq!(batcher.batch_size().get(), 20);

        for n in 3..10 {
            batcher.on_tick(tick(n));
        }

        assert_eq!(next_completed(&mut events).await.batch_size, 10);
        assert_eq!(batcher.status().target_count, 20);
    }

    #[tokio::test]
    async fn rejects_out_of_range_batch_size() {
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(ScriptedTrainer::default()),
            Arc::new(InMemoryEpochStore::new()),
        )
        .await
        .unwrap();

        assert!(batcher.set_batch_size(5).is_err());
        assert!(batcher.set_batch_size(5_000).is_err());
        assert_eq!(batcher.batch_size().get(), 10);
    }

    #[tokio::test]
    async fn lifecycle_changes_persist_collection_settings() {
        let store = Arc::new(InMemoryEpochStore::new());
        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(ScriptedTrainer::default()),
            store.clone(),
        )
        .await
        .unwrap();
        let user = batcher.user_id().clone();

        batcher.start(BatchSize::new(50).unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            store.settings_for(&user),
            Some(CollectionSettings {
                enabled: true,
                batch_size: BatchSize::new(50).unwrap()
            })
        );

        batcher.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.settings_for(&user).map(|s| s.enabled), Some(false));
    }

    #[tokio::test]
    async fn seed_failure_is_reported() {
        let mut store = MockEpochStorePort::new();
        store.expect_available_epoch_count().returning(|_| {
            Err(StoreError::ConnectionError {
                message: "offline".to_string(),
            })
        });

        let result =
            EpochBatcher::spawn(config(10), Arc::new(ScriptedTrainer::default()), Arc::new(store))
                .await;
        assert!(matches!(result, Err(BatcherError::Seed(_))));
    }

    #[tokio::test]
    async fn trainer_receives_batch_values_in_order() {
        let mut trainer = MockTrainerPort::new();
        trainer
            .expect_train()
            .withf(|values: &Vec<f64>| values.len() == 10 && values[0] == 0.0 && values[9] == 9.0)
            .times(1)
            .returning(|_| {
                Ok(TrainingOutcome {
                    loss: 0.0,
                    accuracy: 1.0,
                    duration_millis: 0,
                    model_state: json!({}),
                })
            });

        let batcher = EpochBatcher::spawn(
            config(10),
            Arc::new(trainer),
            Arc::new(InMemoryEpochStore::new()),
        )
        .await
        .unwrap();
        let mut events = batcher.subscribe_events();
        batcher.start(BatchSize::new(10).unwrap());

        for n in 0..10 {
            batcher.on_tick(tick(n));
        }

        assert_eq!(next_completed(&mut events).await.accuracy, 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn successful_training_yields_floor_of_ticks_over_batch_size(
            batch_size in 10usize..40,
            ticks in 0usize..200,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let (committed, remaining) = runtime.block_on(async move {
                let store = Arc::new(InMemoryEpochStore::new());
                let batcher = EpochBatcher::spawn(
                    config(batch_size),
                    Arc::new(ScriptedTrainer::default()),
                    store.clone(),
                )
                .await
                .unwrap();
                let mut events = batcher.subscribe_events();
                batcher.start(BatchSize::new(batch_size).unwrap());

                for n in 0..ticks {
                    batcher.on_tick(tick(n));
                }
                for _ in 0..ticks / batch_size {
                    next_completed(&mut events).await;
                }
                batcher.shutdown();
                (store.epochs().len(), batcher.status().current_count)
            });

            prop_assert_eq!(committed, ticks / batch_size);
            prop_assert_eq!(remaining, ticks % batch_size);
        }
    }
}
