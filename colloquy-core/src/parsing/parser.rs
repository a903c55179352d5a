//! Parse error types

use thiserror::Error;

/// Error type for parsing operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input could not be read as the expected format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Input has not produced any parseable structure yet
    #[error("Incomplete input")]
    Incomplete,

    /// Empty input
    #[error("Empty input")]
    EmptyInput,
}

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;
