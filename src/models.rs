//! Core value types shared across the compute graph and the wire.

use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// Payload carried on every edge between processing nodes and stored in the
/// atomic store.
///
/// JSON encoding is by discriminant: scalars encode as themselves, sequences
/// as arrays. Anything that cannot be represented encodes as `null` so a
/// client never sees a half-encoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Double(f64),
    Text(String),
    IntSeq(Vec<i32>),
    DoubleSeq(Vec<f64>),
    Seq(Vec<Value>),
}

impl Value {
    /// Numeric view used by the dispatcher and the accessor nodes.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => s.serialize_bool(*b),
            Value::Int(i) => s.serialize_i32(*i),
            Value::Double(d) => {
                if d.is_finite() {
                    s.serialize_f64(*d)
                } else {
                    // NaN/inf have no JSON representation
                    s.serialize_none()
                }
            }
            Value::Text(t) => s.serialize_str(t),
            Value::IntSeq(xs) => {
                let mut seq = s.serialize_seq(Some(xs.len()))?;
                for x in xs {
                    seq.serialize_element(x)?;
                }
                seq.end()
            }
            Value::DoubleSeq(xs) => {
                let mut seq = s.serialize_seq(Some(xs.len()))?;
                for x in xs {
                    seq.serialize_element(x)?;
                }
                seq.end()
            }
            Value::Seq(xs) => {
                let mut seq = s.serialize_seq(Some(xs.len()))?;
                for x in xs {
                    seq.serialize_element(x)?;
                }
                seq.end()
            }
        }
    }
}

/// The unit of flow between processing nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolValue {
    pub symbol: String,
    pub value: Value,
}

impl SymbolValue {
    pub fn new(symbol: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            symbol: symbol.into(),
            value: value.into(),
        }
    }
}

/// Symbol fired by `Interval` nodes; downstream treats it as "wildcard tick".
pub const WILDCARD_SYMBOL: &str = "*";

/// One element of a symbol's raw price/volume history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickEntry {
    pub price: f64,
    pub volume: f64,
}

/// A raw feed tick: a symbol plus a named-field object. The dispatcher pulls
/// whichever numeric fields listeners have subscribed to.
#[derive(Debug, Clone)]
pub struct SymbolTick {
    pub symbol: String,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl SymbolTick {
    pub fn numeric_field(&self, field: &str) -> Option<f64> {
        self.payload.get(field).and_then(|v| v.as_f64())
    }
}

// ============================================================================
// Client protocol (WebSocket text frames)
// ============================================================================

/// A single subscription request inside a `subscribe` message.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    /// Stable request key within the session; integer or string accepted.
    pub id: serde_json::Value,
    pub symbol: String,
    pub field: String,
    #[serde(default)]
    pub pipeline: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub stages: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub node: Option<serde_json::Value>,
    #[serde(default, rename = "pollMs")]
    pub poll_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default, rename = "clientId")]
        client_id: Option<String>,
        requests: Vec<SubscribeRequest>,
    },
    Cancel {
        #[serde(default, rename = "clientId")]
        client_id: Option<String>,
        ids: Vec<serde_json::Value>,
    },
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Subscribed {
        key: String,
    },
    Canceled {
        key: String,
    },
    Update {
        key: String,
        symbol: String,
        value: Value,
        ts: i64,
    },
    Error {
        #[serde(rename = "where")]
        where_: &'static str,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(where_: &'static str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            where_,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_json_by_discriminant() {
        assert_eq!(serde_json::to_string(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(serde_json::to_string(&Value::Int(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&Value::Double(1.5)).unwrap(), "1.5");
        assert_eq!(
            serde_json::to_string(&Value::Text("x".into())).unwrap(),
            "\"x\""
        );
        assert_eq!(
            serde_json::to_string(&Value::IntSeq(vec![1, 2])).unwrap(),
            "[1,2]"
        );
        assert_eq!(
            serde_json::to_string(&Value::Seq(vec![Value::Int(1), Value::Bool(false)])).unwrap(),
            "[1,false]"
        );
    }

    #[test]
    fn test_non_finite_double_encodes_null() {
        assert_eq!(
            serde_json::to_string(&Value::Double(f64::NAN)).unwrap(),
            "null"
        );
    }

    #[test]
    fn test_error_message_uses_where_key() {
        let msg = ServerMessage::error("subscribe", "bad request");
        let parsed: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["where"], "subscribe");
        assert_eq!(parsed["message"], "bad request");
    }

    #[test]
    fn test_client_message_parses_subscribe() {
        let raw = r#"{"type":"subscribe","clientId":"c1","requests":[
            {"id":1,"symbol":"AAPL","field":"price","pollMs":250}
        ]}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Subscribe { requests, .. } => {
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].symbol, "AAPL");
                assert_eq!(requests[0].poll_ms, Some(250));
            }
            _ => panic!("expected subscribe"),
        }
    }

    #[test]
    fn test_update_round_trip_shape() {
        let msg = ServerMessage::Update {
            key: "42".to_string(),
            symbol: "AAPL".to_string(),
            value: Value::Double(101.25),
            ts: 1_700_000_000_000,
        };
        let parsed: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(parsed["type"], "update");
        assert_eq!(parsed["key"], "42");
        assert_eq!(parsed["value"], 101.25);
    }
}
