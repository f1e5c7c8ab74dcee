//! Error types for the daemon

use rgm_depends::DependsError;
use rgm_thread::ThreadError;
use thiserror::Error;

/// Daemon error type
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Bad or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source error
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    /// Evaluator error
    #[error("Evaluator error: {0}")]
    Depends(#[from] DependsError),

    /// Request could not be queued
    #[error("Queue error: {0}")]
    Thread(#[from] ThreadError),

    /// State file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// State file could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Resource group not found
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for daemon operations
pub type DaemonResult<T> = std::result::Result<T, DaemonError>;

impl DaemonError {
    pub fn group_not_found(name: &str) -> Self {
        Self::NotFound(format!("Resource group {}", name))
    }
}
