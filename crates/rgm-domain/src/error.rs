//! Error types for failover-domain construction

use thiserror::Error;

/// Failover domain error type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Duplicate failover domain: {0}")]
    DuplicateDomain(String),

    #[error("Node {node} listed more than once in domain {domain}")]
    DuplicateMember { domain: String, node: String },

    #[error("Domain {domain} references unknown node {node}")]
    UnknownNode { domain: String, node: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for domain operations
pub type DomainResult<T> = std::result::Result<T, DomainError>;

impl DomainError {
    pub fn domain_not_found(name: &str) -> Self {
        Self::NotFound(format!("Failover domain {}", name))
    }
}
