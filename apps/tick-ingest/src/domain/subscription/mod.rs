//! Feed Subscription
//!
//! An opaque, structurally-compared subscription request. The connection
//! supervisor stores the latest one and replays it on every successful
//! open; it never interprets the contents.

use serde::Serialize;
use serde_json::{Map, Value};

/// A subscription request sent to the feed after each successful connect.
///
/// Equality is structural over the JSON object, so two requests built with
/// the same keys and values compare equal regardless of key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Subscription(Map<String, Value>);

impl Subscription {
    /// Wrap an existing JSON object.
    #[must_use]
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Standard tick-stream request for a single symbol:
    /// `{"ticks": "<symbol>", "subscribe": 1}`.
    #[must_use]
    pub fn ticks(symbol: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("ticks".to_string(), Value::String(symbol.to_string()));
        fields.insert("subscribe".to_string(), Value::from(1));
        Self(fields)
    }

    /// Parse a subscription from raw JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON or is not an object.
    pub fn from_json(text: &str) -> Result<Self, SubscriptionError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(SubscriptionError::NotAnObject(json_kind(&other))),
        }
    }

    /// Borrow the request fields.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Render the request as a JSON value for sending.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl TryFrom<Value> for Subscription {
    type Error = SubscriptionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(SubscriptionError::NotAnObject(json_kind(&other))),
        }
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Error type for subscription parsing.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// Text was not valid JSON.
    #[error("invalid subscription JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// JSON was valid but not an object.
    #[error("subscription must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ticks_request_shape() {
        let sub = Subscription::ticks("R_10");
        assert_eq!(sub.to_value(), json!({"ticks": "R_10", "subscribe": 1}));
    }

    #[test]
    fn equality_ignores_key_order() {
        let a = Subscription::from_json(r#"{"symbol":"X","subscribe":1}"#).unwrap();
        let b = Subscription::from_json(r#"{"subscribe":1,"symbol":"X"}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_values_are_not_equal() {
        let a = Subscription::from_json(r#"{"symbol":"X"}"#).unwrap();
        let b = Subscription::from_json(r#"{"symbol":"Y"}"#).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            Subscription::from_json("[1,2]"),
            Err(SubscriptionError::NotAnObject("array"))
        ));
        assert!(matches!(
            Subscription::from_json("not json"),
            Err(SubscriptionError::Json(_))
        ));
    }

    #[test]
    fn try_from_value() {
        let sub = Subscription::try_from(json!({"ticks": "R_25"})).unwrap();
        assert_eq!(sub.fields().get("ticks"), Some(&json!("R_25")));
    }
}
