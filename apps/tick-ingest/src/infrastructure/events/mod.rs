//! Feed Event Bus
//!
//! Fan-out of connection-level events to in-process listeners.
//!
//! # Architecture
//!
//! Listeners register per [`EventKind`] and are invoked synchronously, in
//! registration order, on the emitting task. A panicking listener is
//! logged and skipped; the remaining listeners still run. Every emitted
//! event is also forwarded to a tokio broadcast tap for async consumers
//! (health reporting, tests).

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::application::services::{EpochBatcher, TickBuffer};
use crate::domain::connection::ConnectionState;
use crate::domain::tick::Tick;

// =============================================================================
// Events
// =============================================================================

/// Source of a published error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedErrorKind {
    /// Socket open, read, or write failed.
    Transport,
    /// The feed reported an error frame.
    Feed,
    /// Connection health checks failed.
    Heartbeat,
    /// Reconnection gave up.
    Reconnect,
}

impl FeedErrorKind {
    /// Get the kind name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Feed => "feed",
            Self::Heartbeat => "heartbeat",
            Self::Reconnect => "reconnect",
        }
    }
}

/// Error published on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedError {
    /// Where the error came from.
    pub kind: FeedErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl FeedError {
    /// Create a new error event.
    #[must_use]
    pub fn new(kind: FeedErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Events published by the connection supervisor.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The connection changed state.
    StatusChange(ConnectionState),
    /// A frame normalized into a tick.
    Tick(Tick),
    /// Every parsed inbound frame, tick or not.
    Message(Value),
    /// A transport, feed, or health error.
    Error(FeedError),
    /// Reconnection stopped after the attempt limit.
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl FeedEvent {
    /// The listener category this event is delivered to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StatusChange(_) => EventKind::StatusChange,
            Self::Tick(_) => EventKind::Tick,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::ReconnectExhausted { .. } => EventKind::ReconnectExhausted,
        }
    }
}

/// Listener categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Connection state changes.
    StatusChange,
    /// Normalized ticks.
    Tick,
    /// Raw parsed frames.
    Message,
    /// Errors.
    Error,
    /// Reconnect exhaustion.
    ReconnectExhausted,
}

impl EventKind {
    /// All kinds.
    pub const ALL: [Self; 5] = [
        Self::StatusChange,
        Self::Tick,
        Self::Message,
        Self::Error,
        Self::ReconnectExhausted,
    ];

    /// Get the kind name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::Tick => "tick",
            Self::Message => "message",
            Self::Error => "error",
            Self::ReconnectExhausted => "reconnect_exhausted",
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Default capacity of the broadcast tap.
pub const DEFAULT_TAP_CAPACITY: usize = 4_096;

/// Handle returned by [`EventBus::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A registered callback.
pub type Listener = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

/// Synchronous per-kind listener registry with a broadcast tap.
///
/// # Example
///
/// ```rust
/// use tick_ingest::infrastructure::events::{EventBus, EventKind, FeedEvent};
/// use tick_ingest::domain::connection::ConnectionState;
///
/// let bus = EventBus::with_defaults();
/// let id = bus.on(EventKind::StatusChange, |event| {
///     if let FeedEvent::StatusChange(state) = event {
///         println!("feed is {state}");
///     }
/// });
///
/// bus.emit(&FeedEvent::StatusChange(ConnectionState::Connecting));
/// assert!(bus.off(id));
/// ```
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
    tap: broadcast::Sender<FeedEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a bus whose tap holds `tap_capacity` events per receiver.
    #[must_use]
    pub fn new(tap_capacity: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            tap: broadcast::channel(tap_capacity.max(1)).0,
        }
    }

    /// Create a bus with the default tap capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TAP_CAPACITY)
    }

    /// Register a listener for one event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        for registered in listeners.values_mut() {
            if let Some(position) = registered.iter().position(|(lid, _)| *lid == id) {
                registered.remove(position);
                return true;
            }
        }
        false
    }

    /// Deliver an event to its listeners and the tap.
    ///
    /// Returns the number of listeners that completed without panicking.
    pub fn emit(&self, event: &FeedEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::error!(
                        listener = ?id,
                        kind = kind.as_str(),
                        panic = panic_message(panic.as_ref()),
                        "Event listener panicked"
                    );
                }
            }
        }

        let _ = self.tap.send(event.clone());
        delivered
    }

    /// Get a receiver for every emitted event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tap.subscribe()
    }

    /// Number of listeners registered for a kind.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Get statistics about listeners and tap receivers.
    #[must_use]
    pub fn stats(&self) -> EventBusStats {
        let listeners = self.listeners.read();
        let count = |kind: EventKind| listeners.get(&kind).map_or(0, Vec::len);
        EventBusStats {
            status_listeners: count(EventKind::StatusChange),
            tick_listeners: count(EventKind::Tick),
            message_listeners: count(EventKind::Message),
            error_listeners: count(EventKind::Error),
            exhausted_listeners: count(EventKind::ReconnectExhausted),
            tap_receivers: self.tap.receiver_count(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Shared event bus reference.
pub type SharedEventBus = Arc<EventBus>;

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Statistics about the event bus.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusStats {
    /// Status change listeners.
    pub status_listeners: usize,
    /// Tick listeners.
    pub tick_listeners: usize,
    /// Raw message listeners.
    pub message_listeners: usize,
    /// Error listeners.
    pub error_listeners: usize,
    /// Reconnect exhaustion listeners.
    pub exhausted_listeners: usize,
    /// Broadcast tap receivers.
    pub tap_receivers: usize,
}

impl EventBusStats {
    /// Get total number of registered listeners.
    #[must_use]
    pub const fn total_listeners(&self) -> usize {
        self.status_listeners
            + self.tick_listeners
            + self.message_listeners
            + self.error_listeners
            + self.exhausted_listeners
    }
}

// =============================================================================
// Consumer Wiring
// =============================================================================

/// Feed every tick into the buffer.
pub fn attach_tick_buffer(bus: &EventBus, buffer: &Arc<TickBuffer>) -> ListenerId {
    let buffer = Arc::clone(buffer);
    bus.on(EventKind::Tick, move |event| {
        if let FeedEvent::Tick(tick) = event {
            buffer.push(tick.clone());
        }
    })
}

/// Feed ticks and connection state into the batcher.
pub fn attach_batcher(bus: &EventBus, batcher: &Arc<EpochBatcher>) -> [ListenerId; 2] {
    let on_tick = {
        let batcher = Arc::clone(batcher);
        bus.on(EventKind::Tick, move |event| {
            if let FeedEvent::Tick(tick) = event {
                batcher.on_tick(tick.clone());
            }
        })
    };
    let on_status = {
        let batcher = Arc::clone(batcher);
        bus.on(EventKind::StatusChange, move |event| {
            if let FeedEvent::StatusChange(state) = event {
                batcher.on_connection_state(*state);
            }
        })
    };
    [on_tick, on_status]
}

// =============================================================================
// Tests
// =============================================================================
