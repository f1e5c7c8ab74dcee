//! # RGM Restree - Resource rules, resource trees and agent execution
//!
//! A service is a tree of typed resources (IP addresses, filesystems,
//! scripts, ...). Each type is described by a [`ResourceRule`] naming its
//! attributes, its permitted child types and the agent that manages it.
//!
//! ## Layout
//!
//! - [`rules`]: per-type descriptors and the [`RuleRegistry`]
//! - [`resource`]: attribute-bound instances owned by a [`ResourceList`]
//! - [`tree`]: the arena-backed [`ResourceTree`] and attribute inheritance
//! - [`ocf`]: OCF agent environment, exit codes and [`AgentExecutor`]s
//! - [`ops`]: level-ordered `res_start`/`res_stop`/`res_status` walks

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod ocf;
pub mod ops;
pub mod resource;
pub mod rules;
pub mod tree;

pub use error::{RestreeError, RestreeResult};
pub use ocf::{
    AgentExecutor, AgentInvocation, AgentOutcome, AgentSettings, OcfOperation, OcfStatus,
    ProcessExecutor, RecordingExecutor,
};
pub use ops::{res_condstart, res_condstop, res_resinfo, res_start, res_status, res_stop, StatusReport, TreeOp};
pub use resource::{Resource, ResourceAttr, ResourceConfig, ResourceFlags, ResourceId, ResourceList};
pub use rules::{AttrFlags, ChildType, ResourceRule, RuleAttr, RuleRegistry, RESOURCE_MAX_LEVELS};
pub use tree::{NodeFlags, NodeState, ResourceTree, TreeEntry, TreeNode, TreeNodeId};
