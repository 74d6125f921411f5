//! Request/response frames exchanged over the socket.
//!
//! Every frame is one JSON object on one line. Requests carry a caller-chosen
//! `id` that is echoed back verbatim; responses carry exactly one of `result`
//! or `error`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HandlerError;

/// Caller-chosen correlation token. Never interpreted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    /// Anything else a client decides to send (floats, objects, null).
    Other(Value),
}

impl Default for RequestId {
    fn default() -> Self {
        Self::Number(0)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Other(v) => write!(f, "{v}"),
        }
    }
}

/// Request parameters: always a JSON object, empty when omitted.
pub type Params = Map<String, Value>;

/// Client → server request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: RequestId,
    #[serde(default)]
    pub method: String,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Map::is_empty")]
    pub params: Params,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Params, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Params>::deserialize(deserializer)?.unwrap_or_default())
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: Params) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Parse one line off the wire.
    pub fn from_line(line: &[u8]) -> Result<Self, HandlerError> {
        serde_json::from_slice(line).map_err(|_| HandlerError::InvalidJson)
    }

    /// Namespace prefix of the method (`"network"` for `"network.wifi.scan"`).
    pub fn namespace(&self) -> Option<&str> {
        self.method.split_once('.').map(|(ns, _)| ns)
    }
}

/// Server → client response. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Build a response from a handler outcome.
    pub fn from_result(id: RequestId, outcome: Result<Value, HandlerError>) -> Self {
        match outcome {
            Ok(value) => Self::success(id, value),
            Err(err) => Self::error(id, err.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Serialize as one newline-terminated wire frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, serde_json::Error> {
        to_frame(self)
    }
}

/// Serialize any value as one newline-terminated frame.
pub fn to_frame<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}
