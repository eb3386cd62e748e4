//! JSON-RPC 2.0 frame model shared by every wire.
//!
//! Frames are classified, never re-shaped: each variant carries the raw
//! JSON object it was parsed from, so unknown fields survive pass-through
//! untouched. The bridge splices frames without interpreting them; the hub
//! router reads `method`/`id`/`params` and rewrites only `id`.
//!
//! Classification rules:
//!
//! - object with `method` and a usable `id` → `Request`
//! - object with `method` and no `id` → `Notification`
//! - object with `result` or `error` and an `id` → `Response`
//! - anything else is a protocol error

use serde_json::{Map, Value, json};
use thiserror::Error;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// "MCP tool not connected" (hub has no backing session at all).
pub const CODE_NOT_CONNECTED: i64 = -32000;
/// Pending request exceeded its deadline.
pub const CODE_REQUEST_TIMEOUT: i64 = -32001;
/// The tool-server session closed while a request targeted it.
pub const CODE_BACKEND_CLOSED: i64 = -32002;
/// Unknown or disabled method/tool.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// Frame was not parseable JSON.
pub const CODE_PARSE_ERROR: i64 = -32700;

/// Methods recognized on the hub surface. Anything else is not forwarded.
pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// A JSON-RPC request identifier: number or string, chosen by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RpcId {
    Num(i64),
    Str(String),
}

impl RpcId {
    /// Read an id out of a JSON value. `null` and other shapes yield `None`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Num),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// The JSON form of this id.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Num(n) => Value::from(*n),
            Self::Str(s) => Value::from(s.clone()),
        }
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RpcId {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

impl From<&str> for RpcId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

/// A classified JSON-RPC frame. The raw object is authoritative; the
/// variant fields are a parsed view into it.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcFrame {
    Request {
        id: RpcId,
        method: String,
        raw: Map<String, Value>,
    },
    Notification {
        method: String,
        raw: Map<String, Value>,
    },
    Response {
        id: RpcId,
        raw: Map<String, Value>,
    },
}

/// Why a frame failed classification. One frame, one drop; the stream
/// continues.
#[derive(Debug, Error)]
pub enum RpcParseError {
    #[error("frame is empty")]
    Empty,

    #[error("frame is not valid JSON: {0}")]
    Json(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame id must be a number or string")]
    BadId,

    #[error("frame has neither a method nor a result/error")]
    Shape,
}

impl RpcFrame {
    /// Parse and classify one text frame.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcParseError`] describing the first shape violation;
    /// callers drop the frame and keep reading.
    pub fn parse(text: &str) -> Result<Self, RpcParseError> {
        if text.trim().is_empty() {
            return Err(RpcParseError::Empty);
        }
        let value: Value =
            serde_json::from_str(text).map_err(|e| RpcParseError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    /// Classify an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Same contract as [`RpcFrame::parse`].
    pub fn from_value(value: Value) -> Result<Self, RpcParseError> {
        let Value::Object(raw) = value else {
            return Err(RpcParseError::NotAnObject);
        };

        let id = raw.get("id").and_then(RpcId::from_value);
        let method = raw
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);

        // An `id` key that is present but unusable (object, array, float)
        // makes the frame unroutable.
        let id_key_present = matches!(raw.get("id"), Some(v) if !v.is_null());
        if id_key_present && id.is_none() {
            return Err(RpcParseError::BadId);
        }

        match (method, id) {
            (Some(method), Some(id)) => Ok(Self::Request { id, method, raw }),
            (Some(method), None) => Ok(Self::Notification { method, raw }),
            (None, Some(id)) if raw.contains_key("result") || raw.contains_key("error") => {
                Ok(Self::Response { id, raw })
            }
            _ => Err(RpcParseError::Shape),
        }
    }

    /// Build a request frame.
    #[must_use]
    pub fn request(id: RpcId, method: &str, params: Option<Value>) -> Self {
        let mut raw = Map::new();
        raw.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        raw.insert("id".to_string(), id.to_value());
        raw.insert("method".to_string(), Value::from(method));
        if let Some(params) = params {
            raw.insert("params".to_string(), params);
        }
        Self::Request {
            id,
            method: method.to_string(),
            raw,
        }
    }

    /// Build a notification frame.
    #[must_use]
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        let mut raw = Map::new();
        raw.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        raw.insert("method".to_string(), Value::from(method));
        if let Some(params) = params {
            raw.insert("params".to_string(), params);
        }
        Self::Notification {
            method: method.to_string(),
            raw,
        }
    }

    /// Build a success response frame.
    #[must_use]
    pub fn response(id: RpcId, result: Value) -> Self {
        let mut raw = Map::new();
        raw.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        raw.insert("id".to_string(), id.to_value());
        raw.insert("result".to_string(), result);
        Self::Response { id, raw }
    }

    /// Build an error response frame.
    #[must_use]
    pub fn error_response(id: RpcId, code: i64, message: &str) -> Self {
        let mut raw = Map::new();
        raw.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        raw.insert("id".to_string(), id.to_value());
        raw.insert(
            "error".to_string(),
            json!({ "code": code, "message": message }),
        );
        Self::Response { id, raw }
    }

    /// The raw object this frame was parsed from (or built as).
    #[must_use]
    pub fn raw(&self) -> &Map<String, Value> {
        match self {
            Self::Request { raw, .. } | Self::Notification { raw, .. } | Self::Response { raw, .. } => {
                raw
            }
        }
    }

    /// The method, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    /// The id, for requests and responses.
    #[must_use]
    pub fn id(&self) -> Option<&RpcId> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => Some(id),
            Self::Notification { .. } => None,
        }
    }

    #[must_use]
    pub fn params(&self) -> Option<&Value> {
        self.raw().get("params")
    }

    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.raw().get("result")
    }

    #[must_use]
    pub fn error(&self) -> Option<&Value> {
        self.raw().get("error")
    }

    #[must_use]
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::Response { .. })
    }

    /// Rewrite the frame id, in the variant field and in the raw object, so
    /// the serialized form carries the new id but every other byte of the
    /// payload is untouched.
    #[must_use]
    pub fn with_id(self, new_id: RpcId) -> Self {
        match self {
            Self::Request { method, mut raw, .. } => {
                raw.insert("id".to_string(), new_id.to_value());
                Self::Request {
                    id: new_id,
                    method,
                    raw,
                }
            }
            Self::Response { mut raw, .. } => {
                raw.insert("id".to_string(), new_id.to_value());
                Self::Response { id: new_id, raw }
            }
            other @ Self::Notification { .. } => other,
        }
    }

    /// Serialize the frame back to its wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        Value::Object(self.raw().clone()).to_string()
    }
}
