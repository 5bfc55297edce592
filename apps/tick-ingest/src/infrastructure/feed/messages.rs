//! Feed Wire Message Types
//!
//! Wire format types for the inbound tick shapes the normalizer accepts,
//! plus the few control frames the supervisor sends or reacts to.
//!
//! # Inbound Tick Shapes
//!
//! - `FeedTickEnvelope`: feed-specific nested tick (epoch seconds + quote)
//! - `SymbolPriceEnvelope`: generic symbol/price, optional millisecond timestamp
//! - `TimestampPriceEnvelope`: generic timestamp/price (or value), optional market
//!
//! Prices may arrive as JSON numbers or numeric strings.
//!
//! # Control Frames
//!
//! - `PingFrame`: `{"ping": 1}` sent on the heartbeat interval
//! - `PongFrame`: `{"pong": n}` sent in reply to a server `{"ping": n}`
//! - `FeedErrorMessage`: `{"error": {"code", "message"}}` reported by the feed

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// =============================================================================
// Numeric Helpers
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

/// Accept a price as a JSON number or a numeric string.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(value) => Ok(value),
        NumberOrString::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Inbound Tick Shapes
// =============================================================================

/// Feed-specific tick frame.
///
/// # Wire Format (JSON)
/// ```json
/// {"tick": {"epoch": 1700000000, "quote": 6243.512, "symbol": "R_10"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedTickEnvelope {
    /// Nested tick body.
    pub tick: FeedTickBody,
}

/// Body of a feed-specific tick frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedTickBody {
    /// Observation time in seconds since the Unix epoch.
    pub epoch: f64,
    /// Quoted price.
    #[serde(deserialize_with = "lenient_f64")]
    pub quote: f64,
    /// Symbol the quote belongs to.
    pub symbol: String,
}

impl FeedTickBody {
    /// Observation time in milliseconds.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        #[allow(clippy::cast_possible_truncation)]
        let millis = (self.epoch * 1_000.0).round() as i64;
        millis
    }
}

/// Generic symbol/price frame.
///
/// # Wire Format (JSON)
/// ```json
/// {"symbol": "BTCUSDT", "price": "43000.10", "timestamp": 1700000000000}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolPriceEnvelope {
    /// Symbol the price belongs to.
    pub symbol: String,
    /// Price.
    #[serde(deserialize_with = "lenient_f64")]
    pub price: f64,
    /// Observation time in milliseconds; defaults to receive time.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Generic timestamp/price frame.
///
/// # Wire Format (JSON)
/// ```json
/// {"timestamp": 1700000000000, "price": 1.08421, "market": "EURUSD"}
/// ```
///
/// `value` is accepted in place of `price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampPriceEnvelope {
    /// Observation time in milliseconds.
    pub timestamp: i64,
    /// Price.
    #[serde(alias = "value", deserialize_with = "lenient_f64")]
    pub price: f64,
    /// Market label; defaults to `unknown`.
    #[serde(default)]
    pub market: Option<String>,
}

// =============================================================================
// Control Frames
// =============================================================================

/// Heartbeat ping sent to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PingFrame {
    /// Always 1.
    pub ping: u8,
}

impl PingFrame {
    /// The ping frame.
    pub const HEARTBEAT: Self = Self { ping: 1 };
}

/// Reply to a server-initiated ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PongFrame {
    /// Echo of the server's ping payload.
    pub pong: Value,
}

/// Error reported by the feed.
///
/// # Wire Format (JSON)
/// ```json
/// {"error": {"code": "InvalidSymbol", "message": "Symbol X is invalid"}, "msg_type": "ticks"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedErrorMessage {
    /// Error details.
    pub error: FeedErrorBody,
}

/// Body of a feed error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedErrorBody {
    /// Machine-readable error code.
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
}

/// Extract the payload of a server-initiated ping.
///
/// A server ping is a numeric `ping` field. The feed's reply to our own
/// heartbeat (`{"ping": "pong", "msg_type": "ping"}`) is not a server ping.
#[must_use]
pub fn server_ping(frame: &Value) -> Option<&Value> {
    frame.get("ping").filter(|payload| payload.is_number())
}

/// Parse a feed error frame, if this is one.
#[must_use]
pub fn feed_error(frame: &Value) -> Option<FeedErrorMessage> {
    frame.get("error")?;
    FeedErrorMessage::deserialize(frame).ok()
}
