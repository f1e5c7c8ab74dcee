//! Error types for resource rules, resources and tree operations

use thiserror::Error;

use crate::ocf::AgentOutcome;

/// Resource tree error type
#[derive(Debug, Error)]
pub enum RestreeError {
    #[error("Unknown resource type: {0}")]
    UnknownRule(String),

    #[error("Resource rule {0} defined multiple times")]
    DuplicateRule(String),

    #[error("Resource rule {0} has no primary attribute")]
    NoPrimaryAttribute(String),

    #[error("{rtype} resource is missing primary attribute {attr}")]
    MissingPrimary { rtype: String, attr: String },

    #[error("{resource} is missing required attribute {attr}")]
    MissingRequired { resource: String, attr: String },

    #[error("Resource {0} defined multiple times")]
    DuplicateResource(String),

    #[error("{resource}: value {value} of unique attribute {attr} is already in use")]
    UniqueViolation {
        resource: String,
        attr: String,
        value: String,
    },

    #[error("Reference to nonexistent resource {reference} (type {rtype})")]
    UndefinedReference { rtype: String, reference: String },

    #[error("Reference to inlined resource {reference} (type {rtype}) is illegal")]
    InlineReference { rtype: String, reference: String },

    #[error("Max references exceeded for resource {0}")]
    MaxRefsExceeded(String),

    #[error("Resource type {child} is not a permitted child of {parent}")]
    IllegalChild { parent: String, child: String },

    #[error("Failed to spawn agent for {resource}: {source}")]
    Spawn {
        resource: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} on {resource} returned {outcome}")]
    AgentFailed {
        resource: String,
        operation: String,
        outcome: AgentOutcome,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for resource tree operations
pub type RestreeResult<T> = std::result::Result<T, RestreeError>;

impl RestreeError {
    pub fn resource_not_found(name: &str) -> Self {
        Self::NotFound(format!("Resource {}", name))
    }

    /// Whether the error was produced while loading configuration.
    pub fn is_config_error(&self) -> bool {
        !matches!(
            self,
            RestreeError::Spawn { .. } | RestreeError::AgentFailed { .. }
        )
    }
}
