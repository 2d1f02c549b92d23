//! The uniform response envelope every endpoint returns:
//! `{success, message, data, timestamp, error, meta}`.

use crate::errors::ErrorBody;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, message: None, data: Some(data), timestamp: Utc::now(), error: None, meta: None }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()), data: Some(data), timestamp: Utc::now(), error: None, meta: None }
    }

    pub fn ok_with_meta(data: T, meta: serde_json::Value) -> Self {
        Self { success: true, message: None, data: Some(data), timestamp: Utc::now(), error: None, meta: Some(meta) }
    }

    pub fn error(error: ErrorBody) -> Self {
        Self { success: false, message: None, data: None, timestamp: Utc::now(), error: Some(error), meta: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_omits_error() {
        let envelope = Envelope::ok(42);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 42);
        assert!(json.get("error").is_none());
    }
}
