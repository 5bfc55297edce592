//! Frame Codec & Tick Normalizer
//!
//! Decodes raw text frames into JSON and maps any recognized tick shape
//! onto the canonical [`Tick`].
//!
//! # Shape Priority
//!
//! Shapes are tried in a fixed order and the first that type-checks wins:
//!
//! | Priority | Shape            | Required fields                        |
//! |----------|------------------|----------------------------------------|
//! | 1        | `FeedTick`       | `tick.epoch`, `tick.quote`, `tick.symbol` |
//! | 2        | `SymbolPrice`    | `symbol`, `price`                      |
//! | 3        | `TimestampPrice` | `timestamp`, `price` or `value`        |
//!
//! A shape that matches but yields a non-finite value rejects the frame
//! outright; lower-priority shapes are not consulted.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::tick::{Tick, TickError, UNKNOWN_MARKET};
use crate::infrastructure::feed::messages::{
    FeedTickEnvelope, SymbolPriceEnvelope, TimestampPriceEnvelope,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame format.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// Decode a text frame into JSON.
///
/// # Errors
///
/// Returns an error if the frame is not a JSON object or array, or fails
/// to parse.
pub fn decode_frame(text: &str) -> Result<Value, CodecError> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        let preview: String = trimmed.chars().take(50).collect();
        return Err(CodecError::InvalidFormat(format!(
            "expected JSON object or array, got: {preview}..."
        )));
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Encode a value as a JSON text frame.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn encode_frame<T: serde::Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

// =============================================================================
// Wire Shapes
// =============================================================================

/// Recognized inbound tick shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireShape {
    /// Feed-specific nested tick.
    FeedTick,
    /// Generic symbol/price.
    SymbolPrice,
    /// Generic timestamp/price.
    TimestampPrice,
}

impl WireShape {
    /// Shapes in the order they are tried.
    pub const PRIORITY: [Self; 3] = [Self::FeedTick, Self::SymbolPrice, Self::TimestampPrice];

    /// Get the shape name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FeedTick => "feed_tick",
            Self::SymbolPrice => "symbol_price",
            Self::TimestampPrice => "timestamp_price",
        }
    }

    /// Try to read a tick of this shape from a JSON frame.
    ///
    /// Returns `None` if the frame does not have this shape.
    fn decode(self, frame: &Value, received_at_millis: i64) -> Option<Result<Tick, TickError>> {
        match self {
            Self::FeedTick => {
                let envelope: FeedTickEnvelope = try_shape(frame)?;
                let body = envelope.tick;
                Some(Tick::new(body.timestamp_millis(), body.quote, body.symbol))
            }
            Self::SymbolPrice => {
                let envelope: SymbolPriceEnvelope = try_shape(frame)?;
                Some(Tick::new(
                    envelope.timestamp.unwrap_or(received_at_millis),
                    envelope.price,
                    envelope.symbol,
                ))
            }
            Self::TimestampPrice => {
                let envelope: TimestampPriceEnvelope = try_shape(frame)?;
                Some(Tick::new(
                    envelope.timestamp,
                    envelope.price,
                    envelope
                        .market
                        .unwrap_or_else(|| UNKNOWN_MARKET.to_string()),
                ))
            }
        }
    }
}

impl std::fmt::Display for WireShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn try_shape<T: DeserializeOwned>(frame: &Value) -> Option<T> {
    if !frame.is_object() {
        return None;
    }
    T::deserialize(frame).ok()
}

// =============================================================================
// Normalizer
// =============================================================================

/// A tick together with the shape it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTick {
    /// Shape that matched.
    pub shape: WireShape,
    /// The normalized tick.
    pub tick: Tick,
}

/// Reasons a frame produced no tick.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum NormalizeRejection {
    /// No known shape matched.
    #[error("frame matches no known tick shape")]
    UnknownShape,

    /// A shape matched but its value was NaN or infinite.
    #[error("{shape} frame carried non-finite value {value}")]
    NonFiniteValue {
        /// Shape that matched.
        shape: WireShape,
        /// Offending value.
        value: f64,
    },
}

/// Stateless mapper from JSON frames to ticks.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickNormalizer;

impl TickNormalizer {
    /// Create a new normalizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Map one JSON object onto a tick.
    ///
    /// `received_at_millis` is used when the shape carries no timestamp.
    ///
    /// # Errors
    ///
    /// Returns a [`NormalizeRejection`] if no shape matches or the matching
    /// shape yields a non-finite value.
    pub fn normalize(
        &self,
        frame: &Value,
        received_at_millis: i64,
    ) -> Result<NormalizedTick, NormalizeRejection> {
        for shape in WireShape::PRIORITY {
            match shape.decode(frame, received_at_millis) {
                None => {}
                Some(Ok(tick)) => return Ok(NormalizedTick { shape, tick }),
                Some(Err(TickError::NonFiniteValue(value))) => {
                    return Err(NormalizeRejection::NonFiniteValue { shape, value });
                }
            }
        }
        Err(NormalizeRejection::UnknownShape)
    }

    /// Map a frame that may be a single object or an array of objects.
    #[must_use]
    pub fn normalize_all(
        &self,
        frame: &Value,
        received_at_millis: i64,
    ) -> Vec<Result<NormalizedTick, NormalizeRejection>> {
        match frame {
            Value::Array(items) => items
                .iter()
                .map(|item| self.normalize(item, received_at_millis))
                .collect(),
            other => vec![self.normalize(other, received_at_millis)],
        }
    }
}
