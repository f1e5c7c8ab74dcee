//! Error types for shared vocabulary parsing

use thiserror::Error;

/// Errors raised when decoding shared types from configuration or wire values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Unknown request code: {0}")]
    UnknownRequest(i32),

    #[error("Unknown request name: {0}")]
    UnknownRequestName(String),

    #[error("Unknown state code: {0}")]
    UnknownState(i32),

    #[error("Unknown state name: {0}")]
    UnknownStateName(String),

    #[error("Unknown return code: {0}")]
    UnknownReturnCode(i32),

    #[error("Invalid node: {0}")]
    InvalidNode(String),
}

/// Result type for shared type conversions
pub type TypesResult<T> = std::result::Result<T, TypesError>;
