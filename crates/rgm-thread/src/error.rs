//! Error types for the group thread manager

use thiserror::Error;

/// Reasons a request could not be queued
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThreadError {
    #[error("Group {0} is exiting")]
    Exiting(String),

    #[error("Group {0} is relocating; request would block")]
    WouldBlock(String),
}

/// Result type for thread manager operations
pub type ThreadResult<T> = std::result::Result<T, ThreadError>;
