//! Shared test fixtures: an in-memory transport and a supervisor harness.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tick_ingest::infrastructure::events::{EventBus, FeedEvent};
use tick_ingest::infrastructure::feed::{
    ConnectionSupervisor, HeartbeatConfig, InboundFrame, OutboundFrame, ReconnectConfig,
    SupervisorConfig, SupervisorHandle, Transport, TransportConnection, TransportError,
};
use tick_ingest::{ConnectionState, Subscription};

pub const FEED_URL: &str = "wss://feed.test/ws";

// =============================================================================
// Mock Transport
// =============================================================================

/// Server side of one accepted connection.
pub struct MockLink {
    pub url: String,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound: mpsc::UnboundedSender<Result<InboundFrame, TransportError>>,
}

impl MockLink {
    /// Next frame the client wrote, or `None` once the client dropped it.
    pub async fn next_sent(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }

    /// Next text frame the client wrote, parsed as JSON.
    pub async fn next_sent_json(&mut self) -> Value {
        loop {
            match self.next_sent().await.expect("client closed the link") {
                OutboundFrame::Text(text) => return serde_json::from_str(&text).unwrap(),
                OutboundFrame::Close => {}
            }
        }
    }

    /// Frame already written by the client, without waiting.
    pub fn try_sent(&mut self) -> Option<OutboundFrame> {
        self.outbound.try_recv().ok()
    }

    /// Push a text frame to the client.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Ok(InboundFrame::Text(text.into())));
    }

    /// Push a JSON frame to the client.
    pub fn push_json(&self, value: &Value) {
        self.push_text(value.to_string());
    }

    /// Push any frame to the client.
    pub fn push(&self, frame: InboundFrame) {
        let _ = self.inbound.send(Ok(frame));
    }

    /// Fail the client's read side.
    pub fn push_error(&self) {
        let _ = self.inbound.send(Err(TransportError::ConnectionClosed));
    }
}

/// Transport whose connections are in-memory channel pairs.
pub struct MockTransport {
    links: mpsc::UnboundedSender<MockLink>,
    attempts: AtomicU32,
    failing: AtomicBool,
    urls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockLink>) {
        let (links, accepted) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            links,
            attempts: AtomicU32::new(0),
            failing: AtomicBool::new(false),
            urls: Mutex::new(Vec::new()),
        });
        (transport, accepted)
    }

    /// Make every subsequent connect fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of connect calls so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// URLs passed to connect, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<TransportConnection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());

        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("connection refused".to_string()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<InboundFrame, TransportError>>();

        let sink = futures::sink::unfold(out_tx, |tx, frame: OutboundFrame| async move {
            tx.send(frame).map_err(|_| TransportError::ConnectionClosed)?;
            Ok::<_, TransportError>(tx)
        });
        let stream = futures::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let _ = self.links.send(MockLink {
            url: url.to_string(),
            outbound: out_rx,
            inbound: in_tx,
        });

        Ok(TransportConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

// =============================================================================
// Supervisor Harness
// =============================================================================

/// Timing used by the supervisor scenarios.
pub fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        url: FEED_URL.to_string(),
        subscription: Some(Subscription::ticks("R_10")),
        reconnect: ReconnectConfig::default(),
        heartbeat: HeartbeatConfig {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(120),
        },
        command_capacity: 16,
    }
}

pub struct Harness {
    pub handle: SupervisorHandle,
    pub transport: Arc<MockTransport>,
    pub links: mpsc::UnboundedReceiver<MockLink>,
    pub events: broadcast::Receiver<FeedEvent>,
    pub bus: Arc<EventBus>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn start(config: SupervisorConfig) -> Self {
        let bus = Arc::new(EventBus::with_defaults());
        Self::start_with_bus(config, bus)
    }

    pub fn start_with_bus(config: SupervisorConfig, bus: Arc<EventBus>) -> Self {
        let (transport, links) = MockTransport::new();
        let events = bus.subscribe();
        let cancel = CancellationToken::new();
        let supervisor = ConnectionSupervisor::new(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&bus),
        );
        let (handle, task) = supervisor.start(&cancel);
        Self {
            handle,
            transport,
            links,
            events,
            bus,
            cancel,
            task,
        }
    }

    /// Wait for the next accepted connection.
    pub async fn next_link(&mut self) -> MockLink {
        self.links.recv().await.expect("transport dropped")
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.handle.watch_state();
        rx.wait_for(|current| *current == state)
            .await
            .expect("supervisor stopped");
    }

    /// Wait for the first bus event matching `predicate`.
    pub async fn wait_for_event<F>(&mut self, predicate: F) -> FeedEvent
    where
        F: Fn(&FeedEvent) -> bool,
    {
        loop {
            match self.events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}
