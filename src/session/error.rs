//! Error types for session setup and the multiplexer loop

use super::event::Origin;

/// Failures surfaced by connection setup and the session loop
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
    #[error("Failed to connect to the server: {0}")]
    ConnectFailure(String),
    #[error("Failed to set up the remote session: {0}")]
    SessionSetupFailure(String),
    #[error("Failed to read from {origin}: {message}")]
    ReadFailure { origin: Origin, message: String },
    #[error("Failed to write to server's stdin: {0}")]
    WriteFailure(#[source] std::io::Error),
    #[error("Failed to deliver signal to the remote session: {0}")]
    SignalDeliveryFailure(String),
    #[error("Failed to write to the local terminal: {0}")]
    TerminalFailure(#[source] std::io::Error),
}

impl SessionError {
    /// Whether this error ends the session loop
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::ReadFailure { .. } | SessionError::SignalDeliveryFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        let read = SessionError::ReadFailure {
            origin: Origin::RemoteError,
            message: "reset".to_string(),
        };
        assert!(!read.is_fatal());
        assert!(!SessionError::SignalDeliveryFailure("closed".into()).is_fatal());
        assert!(
            SessionError::WriteFailure(std::io::ErrorKind::BrokenPipe.into()).is_fatal()
        );
    }

    #[test]
    fn test_read_failure_names_origin() {
        let err = SessionError::ReadFailure {
            origin: Origin::LocalInput,
            message: "interrupted".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to read from local input: interrupted");
    }
}
