//! Tick Types
//!
//! The canonical internal representation of a single market price
//! observation. Every inbound wire shape is normalized into a [`Tick`]
//! before it reaches the buffer or the batcher.

use serde::Serialize;

/// Decimal places kept on normalized tick values.
pub const VALUE_PRECISION: i32 = 5;

/// Market label used when a wire frame does not carry one.
pub const UNKNOWN_MARKET: &str = "unknown";

// =============================================================================
// Tick
// =============================================================================

/// A single normalized price observation.
///
/// Ticks are immutable once created. The value is always finite and
/// rounded to [`VALUE_PRECISION`] decimal places.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    timestamp_millis: i64,
    value: f64,
    market: String,
}

impl Tick {
    /// Create a tick, rounding the value and rejecting non-finite input.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::NonFiniteValue`] if the value is NaN or infinite.
    pub fn new(
        timestamp_millis: i64,
        value: f64,
        market: impl Into<String>,
    ) -> Result<Self, TickError> {
        if !value.is_finite() {
            return Err(TickError::NonFiniteValue(value));
        }
        Ok(Self {
            timestamp_millis,
            value: round_value(value),
            market: market.into(),
        })
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    /// Normalized price value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Market or symbol label.
    #[must_use]
    pub fn market(&self) -> &str {
        &self.market
    }
}

/// Round a raw price to [`VALUE_PRECISION`] decimal places.
///
/// Values too large to scale carry no fractional digits and are returned
/// as is.
#[must_use]
pub fn round_value(value: f64) -> f64 {
    let factor = 10_f64.powi(VALUE_PRECISION);
    let scaled = value * factor;
    if scaled.is_finite() {
        scaled.round() / factor
    } else {
        value
    }
}

/// Error type for tick construction.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum TickError {
    /// Value was NaN or infinite.
    #[error("tick value {0} is not finite")]
    NonFiniteValue(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_five_decimals() {
        let tick = Tick::new(1_700_000_000_000, 1.234_567_89, "R_10").unwrap();
        assert_eq!(tick.value(), 1.234_57);
        assert_eq!(tick.market(), "R_10");
        assert_eq!(tick.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn rejects_nan_and_infinity() {
        assert!(matches!(
            Tick::new(0, f64::NAN, "X"),
            Err(TickError::NonFiniteValue(_))
        ));
        assert!(matches!(
            Tick::new(0, f64::INFINITY, "X"),
            Err(TickError::NonFiniteValue(_))
        ));
    }

    #[test]
    fn keeps_large_finite_values_that_overflow_when_scaled() {
        assert_eq!(Tick::new(0, 1e304, "X").unwrap().value(), 1e304);
        assert_eq!(Tick::new(0, f64::MAX, "X").unwrap().value(), f64::MAX);
        assert_eq!(Tick::new(0, -f64::MAX, "X").unwrap().value(), -f64::MAX);
    }

    #[test]
    fn serializes_camel_case() {
        let tick = Tick::new(1_000, 2.5, "EURUSD").unwrap();
        let json = serde_json::to_value(&tick).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"timestampMillis": 1000, "value": 2.5, "market": "EURUSD"})
        );
    }
}
