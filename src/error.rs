//! Error types for the cooperative edge cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cooperative edge cache
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Protocol Errors (recoverable)
    // =========================================================================
    /// No response within the retry window
    #[error("Timed out waiting for {operation} from edge {edge_idx}")]
    Timeout { operation: String, edge_idx: u32 },

    /// Message could not be delivered
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backing store failure
    #[error("Cloud error: {0}")]
    Cloud(String),

    // =========================================================================
    // Fatal Errors
    // =========================================================================
    /// Internal invariant broken; indicates a logic error
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Caller asked a policy for something it cannot do
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl Error {
    /// Fatal errors abort the edge instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Invariant(_) | Error::UnsupportedOperation(_))
    }

    /// Shorthand for building an [`Error::Invariant`].
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::Invariant(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::invariant("victim vanished").is_fatal());
        assert!(Error::UnsupportedOperation("evict_if_match".into()).is_fatal());
        assert!(!Error::Cloud("unreachable".into()).is_fatal());

        let timeout = Error::Timeout {
            operation: "directory update".into(),
            edge_idx: 2,
        };
        assert!(!timeout.is_fatal());
        assert!(!Error::Config("bad".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Timeout {
            operation: "redirected get".into(),
            edge_idx: 1,
        };
        assert_eq!(
            err.to_string(),
            "Timed out waiting for redirected get from edge 1"
        );
    }
}
