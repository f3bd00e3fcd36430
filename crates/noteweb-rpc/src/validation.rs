//! Typed decoding of untrusted RPC parameters.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::RpcError;

/// Decode `params` into a per-method parameter struct.
///
/// Absent or `null` params decode as an empty object, so structs whose
/// fields are all optional accept a bare call. Any shape mismatch becomes
/// [`RpcError::BadRequest`].
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let value = match params {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(value) => value,
    };
    serde_json::from_value(value).map_err(|e| RpcError::BadRequest {
        message: format!("Invalid params: {e}"),
    })
}

/// Trim `value` and reject it if nothing is left.
pub fn require_non_empty<'a>(value: &'a str, name: &str) -> Result<&'a str, RpcError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RpcError::BadRequest {
            message: format!("Missing required parameter: {name}"),
        });
    }
    Ok(trimmed)
}
