//! JSON-RPC 2.0 wire types and envelope classification.
//!
//! Every frame carries exactly one JSON object. [`Message::decode`] sorts it
//! into a request, notification or response; anything else is an
//! [`EnvelopeError`] and is dropped by the caller without a reply.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier. The JSON type is preserved on the way back out.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    /// Numeric id.
    Number(Number),
    /// String id.
    String(String),
}

impl RpcId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<u64> for RpcId {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for RpcId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for RpcId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// A call that expects exactly one [`Response`].
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Correlation id echoed by the response.
    pub id: RpcId,
    /// Method name (e.g. `graph.getSnapshot`).
    pub method: String,
    /// Untrusted parameters.
    pub params: Option<Value>,
}

/// A one-way message. Never answered.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Method name (e.g. `graph.changed`).
    pub method: String,
    /// Untrusted parameters.
    pub params: Option<Value>,
}

/// Error member of an error response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Answer to a [`Request`].
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// The call succeeded.
    Success {
        /// Echoed request id.
        id: RpcId,
        /// Result payload.
        result: Value,
    },
    /// The call failed.
    Error {
        /// Echoed request id.
        id: RpcId,
        /// Failure details.
        error: ErrorObject,
    },
}

impl Response {
    /// Build a success response.
    pub fn success(id: RpcId, result: Value) -> Self {
        Self::Success { id, result }
    }

    /// Build an error response without `data`.
    pub fn error(id: RpcId, code: i64, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data: None,
            },
        }
    }

    /// The id this response answers.
    pub fn id(&self) -> &RpcId {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => id,
        }
    }

    /// Whether this is a success response.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Any message that can cross the socket.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Expects a response.
    Request(Request),
    /// Fire-and-forget.
    Notification(Notification),
    /// Answers an earlier request.
    Response(Response),
}

/// Why a frame was not a valid envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame was empty or whitespace.
    #[error("empty message")]
    Empty,
    /// The frame was not JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame was a JSON array.
    #[error("batch messages are not supported")]
    Batch,
    /// The frame was JSON but not an object.
    #[error("message is not a JSON object")]
    NotObject,
    /// `jsonrpc` missing or not `"2.0"`.
    #[error("missing or unsupported jsonrpc version")]
    Version,
    /// `method` present but not a string.
    #[error("method must be a string")]
    MethodType,
    /// `id` present but not a number or string.
    #[error("id must be a number or string")]
    IdType,
    /// Response error member lacks an integer `code` or string `message`.
    #[error("malformed error object")]
    ErrorObject,
    /// Neither a method nor a result/error.
    #[error("message is neither a request, notification nor response")]
    Unclassified,
}

impl Message {
    /// Build a request.
    pub fn request(id: RpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(Request {
            id,
            method: method.into(),
            params,
        })
    }

    /// Build a notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Classify one frame of text.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EnvelopeError::Empty);
        }
        let mut obj = match serde_json::from_str::<Value>(text)? {
            Value::Object(obj) => obj,
            Value::Array(_) => return Err(EnvelopeError::Batch),
            _ => return Err(EnvelopeError::NotObject),
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(EnvelopeError::Version);
        }

        let id = match obj.get("id") {
            Some(raw) => Some(RpcId::from_value(raw).ok_or(EnvelopeError::IdType)?),
            None => None,
        };

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(EnvelopeError::MethodType);
            };
            let params = take_params(&mut obj);
            return Ok(match id {
                Some(id) => Self::Request(Request { id, method, params }),
                None => Self::Notification(Notification { method, params }),
            });
        }

        let Some(id) = id else {
            return Err(EnvelopeError::Unclassified);
        };
        if let Some(error) = obj.remove("error") {
            let error = parse_error_object(error)?;
            return Ok(Self::Response(Response::Error { id, error }));
        }
        match obj.remove("result") {
            Some(result) => Ok(Self::Response(Response::Success { id, result })),
            None => Err(EnvelopeError::Unclassified),
        }
    }

    /// Wire representation.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Request(req) => {
                let mut obj = json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": req.id,
                    "method": req.method,
                });
                put_params(&mut obj, req.params.as_ref());
                obj
            }
            Self::Notification(note) => {
                let mut obj = json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "method": note.method,
                });
                put_params(&mut obj, note.params.as_ref());
                obj
            }
            Self::Response(Response::Success { id, result }) => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "result": result,
            }),
            Self::Response(Response::Error { id, error }) => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "error": error,
            }),
        }
    }

    /// Serialize to a single text frame.
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

fn take_params(obj: &mut Map<String, Value>) -> Option<Value> {
    match obj.remove("params") {
        None | Some(Value::Null) => None,
        Some(params) => Some(params),
    }
}

fn put_params(obj: &mut Value, params: Option<&Value>) {
    if let (Value::Object(map), Some(params)) = (obj, params) {
        let _ = map.insert("params".into(), params.clone());
    }
}

fn parse_error_object(raw: Value) -> Result<ErrorObject, EnvelopeError> {
    let Value::Object(mut obj) = raw else {
        return Err(EnvelopeError::ErrorObject);
    };
    let code = obj
        .get("code")
        .and_then(Value::as_i64)
        .ok_or(EnvelopeError::ErrorObject)?;
    let Some(Value::String(message)) = obj.remove("message") else {
        return Err(EnvelopeError::ErrorObject);
    };
    Ok(ErrorObject {
        code,
        message,
        data: obj.remove("data"),
    })
}
