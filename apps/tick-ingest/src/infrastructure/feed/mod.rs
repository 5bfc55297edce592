//! Feed WebSocket Adapters
//!
//! Everything between the raw socket and the event bus:
//!
//! - **transport**: the socket seam (`tokio-tungstenite` in production)
//! - **codec**: frame decoding and tick normalization
//! - **messages**: wire shapes and control frames
//! - **heartbeat** / **reconnect**: connection health and backoff
//! - **supervisor**: the task that owns the connection

pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod supervisor;
pub mod transport;

pub use codec::{
    CodecError, NormalizeRejection, NormalizedTick, TickNormalizer, WireShape, decode_frame,
    encode_frame,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatState};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy, backoff_delay};
pub use supervisor::{
    ConnectionSupervisor, EnvironmentSignal, SupervisorConfig, SupervisorError, SupervisorHandle,
};
pub use transport::{
    FrameSink, FrameStream, InboundFrame, OutboundFrame, Transport, TransportConnection,
    TransportError, WebSocketTransport,
};
