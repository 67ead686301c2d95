//! JSON-RPC-like message shapes exchanged with the backend.
//!
//! The backend omits the `"jsonrpc": "2.0"` marker, so messages are
//! classified purely by which of `id`, `method`, `result`, and `error` are
//! present:
//!
//! | `id` | `method` | `result`/`error` | Classified as                  |
//! |------|----------|------------------|--------------------------------|
//! | yes  | yes      | —                | [`RpcMessage::Request`]        |
//! | no   | yes      | —                | [`RpcMessage::Notification`]   |
//! | yes  | no       | either           | [`RpcMessage::Response`]       |
//! | *(anything else)* | |               | rejected with [`AppError::Rpc`]|

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{AppError, Result};

/// Correlation identifier of a request.
///
/// Ids minted by this side are always integers; peer-initiated requests may
/// use either form and are echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    Text(String),
}

impl RequestId {
    /// Numeric value of this id, accepting numeric strings.
    #[must_use]
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Numeric error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One classified message on the backend stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    /// A call expecting a response.
    Request {
        /// Correlation id.
        id: RequestId,
        /// Method name.
        method: String,
        /// Method parameters (`Null` when absent).
        params: Value,
    },
    /// A fire-and-forget message.
    Notification {
        /// Method name.
        method: String,
        /// Method parameters (`Null` when absent).
        params: Value,
    },
    /// The answer to an earlier request.
    Response {
        /// Id of the request being answered.
        id: RequestId,
        /// `Ok(result)` or `Err(error)`.
        outcome: std::result::Result<Value, RpcErrorBody>,
    },
}

impl RpcMessage {
    /// Classify a decoded JSON value by shape.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Rpc`] when the value is not an object, carries an
    /// id of the wrong type, or matches none of the three shapes.
    pub fn classify(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(AppError::Rpc("frame is not a json object".into()));
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<RequestId>(raw)
                    .map_err(|e| AppError::Rpc(format!("invalid id: {e}")))?,
            ),
        };
        let method = match obj.remove("method") {
            None => None,
            Some(Value::String(m)) => Some(m),
            Some(other) => {
                return Err(AppError::Rpc(format!("method must be a string, got {other}")))
            }
        };
        let params = obj.remove("params").unwrap_or(Value::Null);

        match (id, method) {
            (Some(id), Some(method)) => Ok(Self::Request { id, method, params }),
            (None, Some(method)) => Ok(Self::Notification { method, params }),
            (Some(id), None) => {
                if let Some(error) = obj.remove("error") {
                    let body = serde_json::from_value::<RpcErrorBody>(error.clone())
                        .unwrap_or_else(|_| RpcErrorBody {
                            code: 0,
                            message: error.to_string(),
                            data: None,
                        });
                    Ok(Self::Response {
                        id,
                        outcome: Err(body),
                    })
                } else if let Some(result) = obj.remove("result") {
                    Ok(Self::Response {
                        id,
                        outcome: Ok(result),
                    })
                } else {
                    Err(AppError::Rpc(format!(
                        "frame with id {id} has neither method, result nor error"
                    )))
                }
            }
            (None, None) => Err(AppError::Rpc("frame has neither id nor method".into())),
        }
    }

    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    /// Wire representation of this message.
    ///
    /// `params` is omitted when `Null`, matching what the backend sends.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        match self {
            Self::Request { id, method, params } => {
                obj.insert("method".into(), json!(method));
                obj.insert("id".into(), json!(id));
                if !params.is_null() {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Notification { method, params } => {
                obj.insert("method".into(), json!(method));
                if !params.is_null() {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response { id, outcome } => {
                obj.insert("id".into(), json!(id));
                match outcome {
                    Ok(result) => obj.insert("result".into(), result.clone()),
                    Err(body) => obj.insert("error".into(), json!(body)),
                };
            }
        }
        Value::Object(obj)
    }
}
