// Error types for the OCR resource core
// Author: kelexine (https://github.com/kelexine)

use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

/// Every failure the resource core can surface to a caller.
///
/// The enum is `Clone` so that a failure can be stored inside a
/// [`ProcessingResult`](crate::pool::ProcessingResult) and delivered to the
/// caller waiting on that request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Request queue is full ({0} pending)")]
    QueueFull(usize),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("No processor registered for operation '{0}'")]
    UnregisteredOperation(String),

    #[error("Worker failure: {0}")]
    WorkerFailure(String),

    #[error("Memory probe failed: {0}")]
    ProbeFailure(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Resource manager is shut down")]
    ShutDown,

    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    #[error("Load failed: {0}")]
    LoadFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResourceError {
    /// Stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceError::ResourceExhausted(_) => "resource_exhausted",
            ResourceError::QueueFull(_) => "queue_full",
            ResourceError::Timeout(_) => "timeout",
            ResourceError::UnregisteredOperation(_) => "unregistered_operation",
            ResourceError::WorkerFailure(_) => "worker_failure",
            ResourceError::ProbeFailure(_) => "probe_failure",
            ResourceError::Cancelled(_) => "cancelled",
            ResourceError::ShutDown => "shut_down",
            ResourceError::UnknownRequest(_) => "unknown_request",
            ResourceError::LoadFailed(_) => "load_failed",
            ResourceError::InvalidArgument(_) => "invalid_argument",
            ResourceError::Config(_) => "config",
        }
    }
}

// Serialized as {"kind", "message"} so results can be reported as JSON
impl Serialize for ResourceError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ResourceError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

// config::ConfigError is not Clone, so keep only its message
impl From<config::ConfigError> for ResourceError {
    fn from(err: config::ConfigError) -> Self {
        ResourceError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_snake_case() {
        let errors = vec![
            ResourceError::QueueFull(3),
            ResourceError::Timeout("slow".to_string()),
            ResourceError::ShutDown,
        ];

        for error in errors {
            let kind = error.kind();
            assert!(kind.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn test_serializes_kind_and_message() {
        let value = serde_json::to_value(ResourceError::QueueFull(2)).unwrap();
        assert_eq!(value["kind"], "queue_full");
        assert_eq!(value["message"], "Request queue is full (2 pending)");
    }

    #[test]
    fn test_config_error_conversion() {
        let err: ResourceError = config::ConfigError::Message("bad key".to_string()).into();
        assert!(matches!(err, ResourceError::Config(ref m) if m.contains("bad key")));
    }
}
