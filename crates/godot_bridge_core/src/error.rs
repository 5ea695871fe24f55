use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Missing connection to frontend.")]
    MissingFrontend,

    #[error("GodotPath is unknown.")]
    GodotPathUnknown,

    #[error("Unable to start debugger.")]
    DebuggerStartFailed { reason: Option<String> },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Environment variable {0} is already set on the launch spec")]
    DuplicateEnvironmentVariable(String),

    #[error("Failed to spawn '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn debugger_start_failed() -> Self {
        Self::DebuggerStartFailed { reason: None }
    }

    pub fn debugger_start_failed_because(reason: impl Into<String>) -> Self {
        Self::DebuggerStartFailed {
            reason: Some(reason.into()),
        }
    }

    pub fn cancelled(what: impl Into<String>) -> Self {
        Self::Cancelled(what.into())
    }

    /// Cancellation aborts a launch but is not a failure and must not be reported as one.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Configuration errors are fatal and never worth retrying.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::MissingFrontend | Self::GodotPathUnknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        assert_eq!(
            BridgeError::MissingFrontend.to_string(),
            "Missing connection to frontend."
        );
        assert_eq!(BridgeError::GodotPathUnknown.to_string(), "GodotPath is unknown.");
        assert_eq!(
            BridgeError::debugger_start_failed().to_string(),
            "Unable to start debugger."
        );
        assert_eq!(
            BridgeError::cancelled("debugger handshake").to_string(),
            "Operation cancelled: debugger handshake"
        );
    }

    #[test]
    fn test_failure_keeps_reason() {
        let err = BridgeError::debugger_start_failed_because("frontend closed the request");
        match err {
            BridgeError::DebuggerStartFailed { reason } => {
                assert_eq!(reason.as_deref(), Some("frontend closed the request"));
            }
            _ => panic!("Expected DebuggerStartFailed variant"),
        }
    }

    #[test]
    fn test_cancellation_is_distinct_from_failure() {
        assert!(BridgeError::cancelled("run").is_cancellation());
        assert!(!BridgeError::debugger_start_failed().is_cancellation());
        assert!(!BridgeError::cancelled("run").is_configuration_error());
    }

    #[test]
    fn test_configuration_errors() {
        assert!(BridgeError::MissingFrontend.is_configuration_error());
        assert!(BridgeError::GodotPathUnknown.is_configuration_error());
        assert!(!BridgeError::debugger_start_failed().is_configuration_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: BridgeError = io_err.into();
        match err {
            BridgeError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn test_serde_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BridgeError = json_err.into();
        assert!(matches!(err, BridgeError::Serialize(_)));
    }
}
