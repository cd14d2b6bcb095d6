//! Stratum v1 wire format: newline-delimited JSON-RPC-ish requests,
//! responses, and notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request read from a miner. `id` is `None` only for malformed input we
/// still want to acknowledge (the spec requires every request carry one, but
/// some miners omit it on errors).
#[derive(Debug, Clone, Deserialize)]
pub struct StratumRequest {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// A response sent back to a miner, `{id, result, error}`.
#[derive(Debug, Clone, Serialize)]
pub struct StratumResponse {
    pub id: Value,
    pub result: Value,
    pub error: Option<ShareError>,
}

impl StratumResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        StratumResponse { id, result, error: None }
    }

    pub fn err(id: Value, error: ShareError) -> Self {
        StratumResponse { id, result: Value::Null, error: Some(error) }
    }
}

/// A server-initiated notification, `{id: null, method, params}`.
#[derive(Debug, Clone, Serialize)]
pub struct StratumNotification {
    pub id: Option<Value>,
    pub method: &'static str,
    pub params: Value,
}

impl StratumNotification {
    pub fn new(method: &'static str, params: Value) -> Self {
        StratumNotification { id: None, method, params }
    }
}

/// The numeric Stratum v1 error codes this proxy emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareErrorKind {
    StaleJob = 21,
    DuplicateShare = 22,
    InvalidSubmit = 23,
    Unauthorized = 24,
    UnknownJob = 25,
}

/// `[code, message, null]`, serialized as a 3-element JSON array per the
/// Stratum v1 convention.
#[derive(Debug, Clone)]
pub struct ShareError {
    pub kind: ShareErrorKind,
    pub message: String,
}

impl ShareError {
    pub fn new(kind: ShareErrorKind, message: impl Into<String>) -> Self {
        ShareError { kind, message: message.into() }
    }
}

impl Serialize for ShareError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&(self.kind as i32))?;
        seq.serialize_element(&self.message)?;
        seq.serialize_element(&Value::Null)?;
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_error_serializes_as_a_three_element_array() {
        let error = ShareError::new(ShareErrorKind::StaleJob, "Job not found");
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value, serde_json::json!([21, "Job not found", null]));
    }

    #[test]
    fn response_without_error_has_null_error_field() {
        let response = StratumResponse::ok(Value::from(1), Value::Bool(true));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["error"], Value::Null);
        assert_eq!(value["result"], Value::Bool(true));
    }
}
