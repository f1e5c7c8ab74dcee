//! Error types for the dependency evaluator

use rgm_types::RequestKind;
use thiserror::Error;

/// Dependency evaluator error type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DependsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{operation} of {resource} refused: {reason}")]
    Refused {
        resource: String,
        operation: RequestKind,
        reason: String,
    },

    #[error("Operation not supported: {0}")]
    Unsupported(RequestKind),

    #[error("Actuator failed on {resource}: {reason}")]
    Actuator { resource: String, reason: String },

    #[error("Plan step {step} ({resource}) failed: {reason}")]
    StepFailed {
        step: usize,
        resource: String,
        reason: String,
    },
}

/// Result type for evaluator operations
pub type DependsResult<T> = std::result::Result<T, DependsError>;

impl DependsError {
    pub fn state_not_found(name: &str) -> Self {
        Self::NotFound(format!("Resource state {}", name))
    }

    pub fn refused(resource: &str, operation: RequestKind, reason: impl Into<String>) -> Self {
        Self::Refused {
            resource: resource.to_string(),
            operation,
            reason: reason.into(),
        }
    }
}
