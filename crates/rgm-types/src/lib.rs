//! RGM Types - Shared vocabulary for the resource-group manager
//!
//! These types are exchanged between the failover-domain model, the resource
//! tree, the dependency evaluator and the per-group worker threads.
//!
//! ## Key Concepts
//!
//! - **NodeId**: Cluster-wide numeric node identifier
//! - **Membership**: Immutable snapshot of configured nodes and their liveness
//! - **RgState**: Lifecycle state of a resource group
//! - **RequestKind**: Operation requested against a resource group
//! - **ReturnCode**: Cluster-wide integer result of a request

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod codes;
pub mod error;
pub mod ids;
pub mod membership;
pub mod request;
pub mod state;

pub use codes::ReturnCode;
pub use error::{TypesError, TypesResult};
pub use ids::NodeId;
pub use membership::{Member, Membership};
pub use request::RequestKind;
pub use state::RgState;
