//! ==============================================================================
//! error.rs - hub error taxonomy
//! ==============================================================================
//!
//! purpose:
//!     one error type for every registry, persistence and notification failure
//!     the hub can report. each variant maps onto its own http status so rest
//!     callers can tell them apart without parsing messages.
//!
//! relationships:
//!     - returned by: registry.rs, storage.rs, hub.rs, notify.rs
//!     - rendered by: api.rs (IntoResponse)
//!
//! ==============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("{kind} capacity of {capacity} reached")]
    CapacityExceeded { kind: &'static str, capacity: usize },

    #[error("{kind} already exists: {id}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The key/value store rejected a write; the mutation was not applied.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Hardware error: {0}")]
    Hardware(String),
}

impl HubError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        HubError::NotFound { kind, id: id.into() }
    }

    pub fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        HubError::DuplicateId { kind, id: id.into() }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        HubError::MalformedInput(msg.into())
    }
}

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        HubError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        HubError::Notification(err.to_string())
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HubError::CapacityExceeded { .. } => (StatusCode::INSUFFICIENT_STORAGE, self.to_string()),
            HubError::DuplicateId { .. } => (StatusCode::CONFLICT, self.to_string()),
            HubError::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            HubError::MalformedInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            HubError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage error".to_string(),
            ),
            HubError::Notification(_) => (
                StatusCode::BAD_GATEWAY,
                "Webhook delivery failed".to_string(),
            ),
            HubError::Hardware(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Hardware error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = HubError::not_found("alarm", "pool_high");
        assert_eq!(error.to_string(), "alarm not found: pool_high");

        let error = HubError::CapacityExceeded { kind: "webhook", capacity: 5 };
        assert_eq!(error.to_string(), "webhook capacity of 5 reached");
    }

    #[test]
    fn test_status_codes_are_distinct() {
        let cases = [
            (HubError::CapacityExceeded { kind: "sensor", capacity: 1 }, StatusCode::INSUFFICIENT_STORAGE),
            (HubError::duplicate("sensor", "a"), StatusCode::CONFLICT),
            (HubError::not_found("sensor", "a"), StatusCode::NOT_FOUND),
            (HubError::malformed("missing id"), StatusCode::BAD_REQUEST),
            (HubError::Storage("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (HubError::Notification("timeout".into()), StatusCode::BAD_GATEWAY),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
