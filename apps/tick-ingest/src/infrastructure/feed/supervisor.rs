//! Connection Supervisor
//!
//! Keeps exactly one feed connection alive. The supervisor runs as a
//! single task that owns the socket, the reconnect policy, the heartbeat
//! state and every timer; callers drive it through a cloneable
//! [`SupervisorHandle`].
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──open──► Connected
//!      ▲                          │                   │
//!      │                       failure         close / error /
//!      │                          │            pong timeout / idle
//!      └──── backoff delay ◄──────┴───────────────────┘
//! ```
//!
//! On every successful open the attempt counter resets, the heartbeat
//! starts and the stored subscription (if any) is sent once. Failures
//! schedule a reconnect after the backoff delay; once the attempt limit
//! is reached a single `ReconnectExhausted` event is published and the
//! supervisor waits for an explicit `connect()`.
//!
//! Events from a socket that has since been replaced are tagged with a
//! stale link id and ignored.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::codec::{self, CodecError, NormalizeRejection, TickNormalizer};
use super::heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatState};
use super::messages::{self, PingFrame, PongFrame};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use super::transport::{
    FrameSink, FrameStream, InboundFrame, OutboundFrame, Transport, TransportConnection,
    TransportError,
};
use crate::domain::connection::ConnectionState;
use crate::domain::subscription::Subscription;
use crate::infrastructure::events::{EventBus, FeedError, FeedErrorKind, FeedEvent};
use crate::infrastructure::metrics;

/// Default capacity of the command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Upper bound on a single outbound write.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a graceful close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned through the supervisor handle.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// No open connection to write to.
    #[error("feed is not connected")]
    NotConnected,

    /// The supervisor task has stopped.
    #[error("connection supervisor has stopped")]
    Stopped,

    /// Payload could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The write failed on the socket.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The write did not complete in time.
    #[error("write timed out after {0:?}")]
    SendTimeout(Duration),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the connection supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Feed WebSocket URL.
    pub url: String,
    /// Subscription sent after every successful open.
    pub subscription: Option<Subscription>,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat and liveness configuration.
    pub heartbeat: HeartbeatConfig,
    /// Capacity of the command channel.
    pub command_capacity: usize,
}

impl SupervisorConfig {
    /// Create a configuration with default timing.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscription: None,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }

    /// Set the initial subscription.
    #[must_use]
    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// Create configuration from `PipelineConfig`.
    #[must_use]
    pub fn from_pipeline_config(config: &crate::PipelineConfig) -> Self {
        Self {
            url: config.feed.url.clone(),
            subscription: Some(config.feed.subscription.clone()),
            reconnect: ReconnectConfig::from_websocket_settings(&config.websocket),
            heartbeat: HeartbeatConfig::from_websocket_settings(&config.websocket),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

/// Host environment notifications that may trigger a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentSignal {
    /// The consumer became visible again.
    Visible,
    /// The consumer was hidden.
    Hidden,
    /// Network connectivity returned.
    Online,
    /// Network connectivity was lost.
    Offline,
    /// The process is about to exit; stop all timers.
    Unload,
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    SetSubscription(Subscription),
    SetUrl(String),
    Send {
        payload: Value,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Environment(EnvironmentSignal),
    Shutdown,
}

/// Cloneable handle to a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    bus: Arc<EventBus>,
}

impl SupervisorHandle {
    /// Request a connection. Resets the attempt counter and clears any
    /// previous exhaustion. No-op while already connecting or connected.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Stopped`] if the supervisor has exited.
    pub async fn connect(&self) -> Result<(), SupervisorError> {
        self.command(Command::Connect).await
    }

    /// Close the connection and stop reconnecting.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Stopped`] if the supervisor has exited.
    pub async fn disconnect(&self) -> Result<(), SupervisorError> {
        self.command(Command::Disconnect).await
    }

    /// Store a subscription. Sent immediately if connected and different
    /// from the stored one, otherwise on the next successful open.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Stopped`] if the supervisor has exited.
    pub async fn set_subscription(&self, subscription: Subscription) -> Result<(), SupervisorError> {
        self.command(Command::SetSubscription(subscription)).await
    }

    /// Change the feed URL. An active connection is replaced immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Stopped`] if the supervisor has exited.
    pub async fn set_url(&self, url: impl Into<String>) -> Result<(), SupervisorError> {
        self.command(Command::SetUrl(url.into())).await
    }

    /// Serialize and send a payload on the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::NotConnected`] when no connection is
    /// open, or the encode/write error otherwise.
    pub async fn send<T: Serialize + Sync>(&self, payload: &T) -> Result<(), SupervisorError> {
        let payload = serde_json::to_value(payload).map_err(CodecError::from)?;
        let (reply, response) = oneshot::channel();
        self.command(Command::Send { payload, reply }).await?;
        response.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Deliver a host environment notification.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Stopped`] if the supervisor has exited.
    pub async fn signal(&self, signal: EnvironmentSignal) -> Result<(), SupervisorError> {
        self.command(Command::Environment(signal)).await
    }

    /// Ask the supervisor to close the connection and exit.
    pub async fn shutdown(&self) {
        let _ = self.command(Command::Shutdown).await;
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// The bus this supervisor publishes to.
    #[must_use]
    pub const fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    async fn command(&self, command: Command) -> Result<(), SupervisorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SupervisorError::Stopped)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Builder for the supervisor task.
pub struct ConnectionSupervisor {
    config: SupervisorConfig,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    /// Create a new supervisor. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(config: SupervisorConfig, transport: Arc<dyn Transport>, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            transport,
            bus,
        }
    }

    /// Spawn the supervisor task. It starts disconnected.
    ///
    /// Cancelling `cancel` (or calling [`SupervisorHandle::shutdown`]) closes
    /// the connection and ends the task.
    #[must_use]
    pub fn start(self, cancel: &CancellationToken) -> (SupervisorHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(self.config.command_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (link_tx, link_rx) = mpsc::unbounded_channel();

        let actor = SupervisorActor {
            url: self.config.url,
            subscription: self.config.subscription,
            reconnect_policy: ReconnectPolicy::new(self.config.reconnect),
            heartbeat_config: self.config.heartbeat,
            transport: self.transport,
            bus: Arc::clone(&self.bus),
            normalizer: TickNormalizer::new(),
            commands: command_rx,
            link_tx,
            link_rx,
            state_tx,
            cancel: cancel.child_token(),
            state: ConnectionState::Disconnected,
            auto_reconnect: false,
            exhausted: false,
            link_id: 0,
            sink: None,
            reader: None,
            opener: None,
            reconnect_at: None,
            heartbeat: HeartbeatState::new(Instant::now()),
            ping_timer: None,
            liveness_timer: None,
        };

        let task = tokio::spawn(actor.run());
        let handle = SupervisorHandle {
            commands: command_tx,
            state_rx,
            bus: self.bus,
        };
        (handle, task)
    }
}

// =============================================================================
// Actor
// =============================================================================

enum LinkEvent {
    Opened {
        link: u64,
        connection: TransportConnection,
    },
    OpenFailed {
        link: u64,
        error: TransportError,
    },
    Frame {
        link: u64,
        frame: InboundFrame,
    },
    Failed {
        link: u64,
        error: TransportError,
    },
    Ended {
        link: u64,
    },
}

impl LinkEvent {
    const fn link(&self) -> u64 {
        match self {
            Self::Opened { link, .. }
            | Self::OpenFailed { link, .. }
            | Self::Frame { link, .. }
            | Self::Failed { link, .. }
            | Self::Ended { link } => *link,
        }
    }
}

struct SupervisorActor {
    url: String,
    subscription: Option<Subscription>,
    reconnect_policy: ReconnectPolicy,
    heartbeat_config: HeartbeatConfig,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    normalizer: TickNormalizer,
    commands: mpsc::Receiver<Command>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,

    state: ConnectionState,
    auto_reconnect: bool,
    exhausted: bool,
    link_id: u64,
    sink: Option<FrameSink>,
    reader: Option<JoinHandle<()>>,
    opener: Option<JoinHandle<()>>,
    reconnect_at: Option<Instant>,
    heartbeat: HeartbeatState,
    ping_timer: Option<Interval>,
    liveness_timer: Option<Interval>,
}

impl SupervisorActor {
    async fn run(mut self) {
        tracing::info!(url = %self.url, "Connection supervisor started");
        self.liveness_timer = Some(new_interval(self.heartbeat_config.liveness_interval));

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Connection supervisor cancelled");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.link_rx.recv() => self.handle_link_event(event).await,
                () = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open();
                }
                () = sleep_until(self.heartbeat.pong_deadline()) => self.on_pong_timeout().await,
                () = next_tick(&mut self.ping_timer) => self.on_ping_due().await,
                () = next_tick(&mut self.liveness_timer) => self.on_liveness_check().await,
            }
        }

        self.teardown().await;
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect_requested(),
            Command::Disconnect => self.disconnect_requested().await,
            Command::SetSubscription(subscription) => self.set_subscription(subscription).await,
            Command::SetUrl(url) => self.set_url(url).await,
            Command::Send { payload, reply } => {
                let result = self.send_payload(&payload).await;
                let _ = reply.send(result);
            }
            Command::Environment(signal) => self.on_environment(signal),
            Command::Shutdown => self.cancel.cancel(),
        }
    }

    fn connect_requested(&mut self) {
        self.auto_reconnect = true;
        self.exhausted = false;
        self.reconnect_policy.reset();
        self.reconnect_at = None;

        if self.state.is_active() {
            tracing::debug!(state = %self.state, "Connect requested while already active");
            return;
        }
        self.open();
    }

    async fn disconnect_requested(&mut self) {
        self.auto_reconnect = false;
        self.reconnect_at = None;
        self.close_link(true).await;
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Feed disconnected by request");
    }

    async fn set_subscription(&mut self, subscription: Subscription) {
        if self.subscription.as_ref() == Some(&subscription) {
            tracing::debug!("Subscription unchanged");
            return;
        }
        self.subscription = Some(subscription.clone());

        if self.state.is_connected() {
            self.send_subscription(&subscription).await;
        } else {
            tracing::debug!(state = %self.state, "Subscription stored until next connect");
        }
    }

    async fn set_url(&mut self, url: String) {
        if url == self.url {
            return;
        }
        tracing::info!(from = %self.url, to = %url, "Feed URL changed");
        self.url = url;

        if self.state.is_active() {
            self.close_link(true).await;
            self.set_state(ConnectionState::Disconnected);
            self.reconnect_policy.reset();
            self.reconnect_at = None;
            self.open();
        }
    }

    async fn send_payload(&mut self, payload: &Value) -> Result<(), SupervisorError> {
        if !self.state.is_connected() {
            return Err(SupervisorError::NotConnected);
        }
        let result = self.write_json(payload).await;
        if let Err(error @ (SupervisorError::Transport(_) | SupervisorError::SendTimeout(_))) =
            &result
        {
            self.fail_link(error.to_string()).await;
        }
        result
    }

    fn on_environment(&mut self, signal: EnvironmentSignal) {
        match signal {
            EnvironmentSignal::Visible | EnvironmentSignal::Online => {
                if !self.auto_reconnect {
                    tracing::debug!(?signal, "No connection requested, ignoring signal");
                } else if !self.state.is_active() {
                    tracing::info!(?signal, "Environment signal, reconnecting");
                    self.connect_requested();
                }
            }
            EnvironmentSignal::Hidden => tracing::debug!("Feed consumer hidden"),
            EnvironmentSignal::Offline => tracing::info!("Network reported offline"),
            EnvironmentSignal::Unload => {
                tracing::info!("Unload signalled, stopping timers");
                self.reconnect_at = None;
                self.ping_timer = None;
                self.liveness_timer = None;
                self.heartbeat.clear_pong_deadline();
            }
        }
    }

    // -------------------------------------------------------------------------
    // Link Lifecycle
    // -------------------------------------------------------------------------

    fn open(&mut self) {
        if let Some(opener) = self.opener.take() {
            opener.abort();
        }
        self.link_id += 1;
        let link = self.link_id;

        self.set_state(ConnectionState::Connecting);
        metrics::record_connect_attempt();
        tracing::info!(url = %self.url, link, "Connecting to feed");

        let transport = Arc::clone(&self.transport);
        let url = self.url.clone();
        let link_tx = self.link_tx.clone();
        self.opener = Some(tokio::spawn(async move {
            let event = match transport.connect(&url).await {
                Ok(connection) => LinkEvent::Opened { link, connection },
                Err(error) => LinkEvent::OpenFailed { link, error },
            };
            let _ = link_tx.send(event);
        }));
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        if event.link() != self.link_id {
            tracing::trace!(
                link = event.link(),
                current = self.link_id,
                "Ignoring event from replaced link"
            );
            return;
        }

        match event {
            LinkEvent::Opened { connection, .. } => self.on_opened(connection).await,
            LinkEvent::OpenFailed { error, .. } => {
                self.opener = None;
                tracing::warn!(url = %self.url, error = %error, "Feed connection failed");
                self.fail_link(error.to_string()).await;
            }
            LinkEvent::Frame { frame, .. } => self.on_frame(frame).await,
            LinkEvent::Failed { error, .. } => {
                tracing::warn!(error = %error, "Feed connection error");
                self.fail_link(error.to_string()).await;
            }
            LinkEvent::Ended { .. } => {
                tracing::info!("Feed stream ended");
                self.drop_link().await;
            }
        }
    }

    async fn on_opened(&mut self, connection: TransportConnection) {
        self.opener = None;
        let TransportConnection { sink, stream } = connection;
        self.reader = Some(tokio::spawn(read_frames(
            self.link_id,
            stream,
            self.link_tx.clone(),
        )));
        self.sink = Some(sink);

        self.reconnect_policy.reset();
        self.exhausted = false;
        self.heartbeat.reset(Instant::now());
        self.ping_timer = Some(new_interval(self.heartbeat_config.ping_interval));

        self.set_state(ConnectionState::Connected);
        metrics::record_connected();
        tracing::info!(url = %self.url, "Feed connected");

        if let Some(subscription) = self.subscription.clone() {
            self.send_subscription(&subscription).await;
        }
    }

    /// Transport failure: publish the error, then drop the link.
    async fn fail_link(&mut self, message: String) {
        self.set_state(ConnectionState::Errored);
        metrics::record_error(FeedErrorKind::Transport);
        self.bus.emit(&FeedEvent::Error(FeedError::new(
            FeedErrorKind::Transport,
            message,
        )));
        self.drop_link().await;
    }

    /// Close whatever is open and schedule a reconnect if one is wanted.
    async fn drop_link(&mut self) {
        self.close_link(false).await;
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    async fn close_link(&mut self, graceful: bool) {
        self.link_id += 1;
        if let Some(opener) = self.opener.take() {
            opener.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            if graceful {
                let close = async {
                    let _ = sink.send(OutboundFrame::Close).await;
                    let _ = sink.close().await;
                };
                if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
                    tracing::debug!("Close handshake timed out");
                }
            }
        }
        self.ping_timer = None;
        self.heartbeat.clear_pong_deadline();
    }

    fn schedule_reconnect(&mut self) {
        if !self.auto_reconnect || self.exhausted || self.reconnect_at.is_some() {
            return;
        }

        if let Some(delay) = self.reconnect_policy.next_delay() {
            let attempt = self.reconnect_policy.attempt_count();
            tracing::info!(
                attempt,
                max_attempts = self.reconnect_policy.max_attempts(),
                delay_ms = delay.as_millis(),
                "Scheduling feed reconnect"
            );
            metrics::record_reconnect_scheduled();
            self.reconnect_at = Some(Instant::now() + delay);
        } else {
            let attempts = self.reconnect_policy.attempt_count();
            let error = ReconnectError::MaxAttemptsExceeded(attempts);
            self.exhausted = true;

            tracing::error!(error = %error, "Giving up on feed reconnection");
            metrics::record_reconnect_exhausted();
            self.bus.emit(&FeedEvent::Error(FeedError::new(
                FeedErrorKind::Reconnect,
                error.to_string(),
            )));
            self.bus.emit(&FeedEvent::ReconnectExhausted { attempts });
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    async fn on_frame(&mut self, frame: InboundFrame) {
        self.heartbeat.record_inbound(Instant::now());

        match frame {
            InboundFrame::Text(text) => self.on_text(&text).await,
            InboundFrame::Ping => tracing::trace!("Transport ping received"),
            InboundFrame::Pong => tracing::trace!("Transport pong received"),
            InboundFrame::Close(reason) => {
                tracing::info!(
                    reason = reason.as_deref().unwrap_or_default(),
                    "Feed closed the connection"
                );
                self.drop_link().await;
            }
        }
    }

    async fn on_text(&mut self, text: &str) {
        metrics::record_frame_received();

        let frame = match codec::decode_frame(text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(error = %error, "Dropping undecodable frame");
                metrics::record_frame_dropped("decode");
                return;
            }
        };

        if let Some(payload) = messages::server_ping(&frame) {
            let pong = PongFrame {
                pong: payload.clone(),
            };
            if let Err(error) = self.write_json(&pong).await {
                tracing::debug!(error = %error, "Failed to answer server ping");
            }
        }

        if let Some(feed_error) = messages::feed_error(&frame) {
            tracing::warn!(
                code = feed_error.error.code.as_deref().unwrap_or_default(),
                message = %feed_error.error.message,
                "Feed reported an error"
            );
            metrics::record_error(FeedErrorKind::Feed);
            self.bus.emit(&FeedEvent::Error(FeedError::new(
                FeedErrorKind::Feed,
                feed_error.error.message,
            )));
        }

        let received_at = Utc::now().timestamp_millis();
        for result in self.normalizer.normalize_all(&frame, received_at) {
            match result {
                Ok(normalized) => {
                    metrics::record_tick(normalized.shape);
                    self.bus.emit(&FeedEvent::Tick(normalized.tick));
                }
                Err(NormalizeRejection::UnknownShape) => {
                    tracing::trace!("Frame carried no tick");
                }
                Err(rejection) => {
                    tracing::debug!(reason = %rejection, "Tick rejected");
                    metrics::record_frame_dropped("non_finite");
                }
            }
        }

        self.bus.emit(&FeedEvent::Message(frame));
    }

    // -------------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------------

    async fn on_ping_due(&mut self) {
        if !self.state.is_connected() {
            return;
        }

        match self.write_json(&PingFrame::HEARTBEAT).await {
            Ok(()) => {
                self.heartbeat
                    .mark_ping_sent(Instant::now(), self.heartbeat_config.pong_timeout);
                tracing::trace!("Heartbeat ping sent");
            }
            Err(error) => {
                tracing::warn!(error = %error, "Heartbeat ping failed");
                self.fail_link(error.to_string()).await;
            }
        }
    }

    async fn on_pong_timeout(&mut self) {
        self.heartbeat.clear_pong_deadline();
        if !self.state.is_connected() {
            return;
        }

        let error = HeartbeatError::Timeout(self.heartbeat_config.pong_timeout);
        tracing::warn!(error = %error, "No traffic after heartbeat ping, reconnecting");
        metrics::record_heartbeat_timeout();
        self.bus.emit(&FeedEvent::Error(FeedError::new(
            FeedErrorKind::Heartbeat,
            error.to_string(),
        )));
        self.drop_link().await;
    }

    async fn on_liveness_check(&mut self) {
        let now = Instant::now();
        match self.state {
            ConnectionState::Connected
                if self
                    .heartbeat
                    .is_idle(now, self.heartbeat_config.idle_timeout) =>
            {
                let error = HeartbeatError::Idle(self.heartbeat.time_since_inbound(now));
                tracing::warn!(error = %error, "Feed connection stale, reconnecting");
                metrics::record_stale_connection();
                self.bus.emit(&FeedEvent::Error(FeedError::new(
                    FeedErrorKind::Heartbeat,
                    error.to_string(),
                )));
                self.drop_link().await;
            }
            ConnectionState::Disconnected
                if self.auto_reconnect && !self.exhausted && self.reconnect_at.is_none() =>
            {
                tracing::info!("Liveness check found feed disconnected, reconnecting");
                self.open();
            }
            _ => {}
        }
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    async fn send_subscription(&mut self, subscription: &Subscription) {
        match self.write_json(subscription).await {
            Ok(()) => tracing::info!(subscription = %subscription.to_value(), "Subscription sent"),
            Err(error) => {
                tracing::warn!(error = %error, "Failed to send subscription");
                self.fail_link(error.to_string()).await;
            }
        }
    }

    async fn write_json<T: Serialize + Sync>(&mut self, payload: &T) -> Result<(), SupervisorError> {
        let text = codec::encode_frame(payload)?;
        self.write_frame(OutboundFrame::Text(text)).await
    }

    async fn write_frame(&mut self, frame: OutboundFrame) -> Result<(), SupervisorError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(SupervisorError::NotConnected);
        };
        tokio::time::timeout(SEND_TIMEOUT, sink.send(frame))
            .await
            .map_err(|_| SupervisorError::SendTimeout(SEND_TIMEOUT))??;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);
        tracing::debug!(from = %previous, to = %next, "Feed state changed");
        metrics::set_connection_state(next);
        self.state_tx.send_replace(next);
        self.bus.emit(&FeedEvent::StatusChange(next));
    }

    async fn teardown(&mut self) {
        self.reconnect_at = None;
        self.liveness_timer = None;
        self.close_link(true).await;
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Connection supervisor stopped");
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn read_frames(link: u64, mut stream: FrameStream, link_tx: mpsc::UnboundedSender<LinkEvent>) {
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(frame) => LinkEvent::Frame { link, frame },
            Err(error) => {
                let _ = link_tx.send(LinkEvent::Failed { link, error });
                return;
            }
        };
        if link_tx.send(event).is_err() {
            return;
        }
    }
    let _ = link_tx.send(LinkEvent::Ended { link });
}

fn new_interval(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn config_defaults() {
        let config = SupervisorConfig::new("wss://example.test/ws");
        assert_eq!(config.url, "wss://example.test/ws");
        assert!(config.subscription.is_none());
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.heartbeat.ping_interval, Duration::from_secs(30));
    }

    #[test]
    fn with_subscription_sets_initial_request() {
        let config =
            SupervisorConfig::new("wss://example.test/ws").with_subscription(Subscription::ticks("R_10"));
        assert_eq!(config.subscription, Some(Subscription::ticks("R_10")));
    }

    #[tokio::test]
    async fn handle_reports_stopped_after_shutdown() {
        let bus = Arc::new(EventBus::with_defaults());
        let supervisor = ConnectionSupervisor::new(
            SupervisorConfig::new("wss://example.test/ws"),
            Arc::new(super::super::transport::WebSocketTransport::new()),
            bus,
        );
        let cancel = CancellationToken::new();
        let (handle, task) = supervisor.start(&cancel);

        handle.shutdown().await;
        assert_ok!(task.await);

        let err = assert_err!(handle.connect().await);
        assert!(matches!(err, SupervisorError::Stopped));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected() {
        let bus = Arc::new(EventBus::with_defaults());
        let supervisor = ConnectionSupervisor::new(
            SupervisorConfig::new("wss://example.test/ws"),
            Arc::new(super::super::transport::WebSocketTransport::new()),
            bus,
        );
        let cancel = CancellationToken::new();
        let (handle, task) = supervisor.start(&cancel);

        let err = assert_err!(handle.send(&serde_json::json!({"ping": 1})).await);
        assert!(matches!(err, SupervisorError::NotConnected));
        assert_eq!(handle.state(), ConnectionState::Disconnected);

        cancel.cancel();
        task.await.unwrap();
    }
}
