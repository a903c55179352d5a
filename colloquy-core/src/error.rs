//! Error types for Colloquy operations

use crate::streaming::FinalizationFailure;

/// Result type for Colloquy operations
pub type Result<T> = std::result::Result<T, ColloquyError>;

/// Error types for the session engine
#[derive(Debug, thiserror::Error)]
pub enum ColloquyError {
    /// The backend rejected or failed a request before streaming began
    #[error("Backend error: {0}")]
    Backend(String),

    /// The backend stream failed after it started
    #[error("Stream error: {0}")]
    Stream(String),

    /// The backend stopped before its output was complete
    #[error("Backend output truncated: {0}")]
    Truncated(String),

    /// The terminal payload could not be turned into a message or summary
    #[error("Finalization failed: {0}")]
    Finalization(#[from] FinalizationFailure),

    /// The rendered prompt does not fit the backend's hard token limit
    #[error("Context overflow: estimated {estimated} tokens exceeds hard limit of {limit}")]
    ContextOverflow {
        /// Estimated prompt size
        estimated: usize,
        /// Configured hard limit
        limit: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Conversation store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ColloquyError {
    fn from(s: String) -> Self {
        ColloquyError::Other(s)
    }
}

impl From<&str> for ColloquyError {
    fn from(s: &str) -> Self {
        ColloquyError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for ColloquyError {
    fn from(err: anyhow::Error) -> Self {
        ColloquyError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_overflow_display() {
        let err = ColloquyError::ContextOverflow {
            estimated: 5000,
            limit: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Context overflow: estimated 5000 tokens exceeds hard limit of 4096"
        );
    }

    #[test]
    fn test_string_conversions() {
        let err: ColloquyError = "boom".into();
        assert!(matches!(err, ColloquyError::Other(ref m) if m == "boom"));

        let err: ColloquyError = anyhow::anyhow!("wrapped").into();
        assert_eq!(err.to_string(), "wrapped");
    }

    #[test]
    fn test_finalization_conversion() {
        let err: ColloquyError = FinalizationFailure::MissingContent.into();
        assert!(matches!(
            err,
            ColloquyError::Finalization(FinalizationFailure::MissingContent)
        ));
    }
}
