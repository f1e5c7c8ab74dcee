//! # RGM Domain - Failover domains
//!
//! A failover domain is an administrator-defined set of nodes allowed, or
//! preferred, to run a service. Domains may be:
//!
//! - **Ordered**: members carry a priority (1 is most preferred)
//! - **Restricted**: only members may ever run the service
//! - **No-failback**: a service already running on a legitimate member is
//!   not pulled back to a more preferred member when one rejoins
//!
//! [`FailoverDomains`] holds the whole domain set plus the service to
//! domain bindings and answers [`FailoverDomains::node_should_start`].

#![deny(unsafe_code)]

pub mod domain;
pub mod error;
pub mod registry;

pub use domain::{
    node_in_domain, DomainClass, DomainConfig, DomainFlags, DomainMember, DomainMemberConfig,
    FailoverDomain,
};
pub use error::{DomainError, DomainResult};
pub use registry::{FailoverDomains, FodRank};
