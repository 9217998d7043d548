//! Error types for prochost
//!
//! Centralized error handling using thiserror. Worker failures (launch
//! failure, bad message, channel error, exit) are not errors in this sense:
//! they surface through host observers. These variants cover misuse of the
//! orchestrator API and I/O at its edges.

use thiserror::Error;

/// All error types that can occur in prochost
#[derive(Debug, Error)]
pub enum HostError {
    /// No live host with this id
    #[error("Host not found: {0}")]
    HostNotFound(i32),

    /// Operation not valid in the host's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The launcher could not be asked to start a process
    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    /// Channel or bootstrap handshake error
    #[error("Channel error: {0}")]
    Channel(String),

    /// Structurally invalid message from a worker
    #[error("Bad message: {0}")]
    BadMessage(String),

    /// Service name not present in the directory
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Logical thread registration or posting error
    #[error("Thread error: {0}")]
    Thread(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for prochost operations
pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_not_found_error() {
        let err = HostError::HostNotFound(7);
        assert_eq!(err.to_string(), "Host not found: 7");
    }

    #[test]
    fn test_invalid_state_error() {
        let err = HostError::InvalidState("host is being deleted".to_string());
        assert_eq!(err.to_string(), "Invalid state: host is being deleted");
    }

    #[test]
    fn test_launch_failed_error() {
        let err = HostError::LaunchFailed("worker program not configured".to_string());
        assert_eq!(err.to_string(), "Launch failed: worker program not configured");
    }

    #[test]
    fn test_channel_error() {
        let err = HostError::Channel("token already consumed".to_string());
        assert_eq!(err.to_string(), "Channel error: token already consumed");
    }

    #[test]
    fn test_thread_error() {
        let err = HostError::Thread("Host_IOThread already registered".to_string());
        assert_eq!(err.to_string(), "Thread error: Host_IOThread already registered");
    }

    #[test]
    fn test_service_not_found_error() {
        let err = HostError::ServiceNotFound("audio".to_string());
        assert_eq!(err.to_string(), "Service not found: audio");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HostError = io_err.into();
        assert!(matches!(err, HostError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: HostError = json_err.into();
        assert!(matches!(err, HostError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(HostError::InvalidState("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
