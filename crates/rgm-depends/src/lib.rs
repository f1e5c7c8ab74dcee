//! RGM Depends - Dependency graph and resource-group state evaluator
//!
//! The evaluator answers three questions about a set of resource states:
//! is the placement legal (`dep_check`), how to reach the ideal placement
//! (`dep_calc_trans`), and whether an administrator request may proceed
//! (`dep_check_operation`). Plans are carried out by `dep_apply_trans`
//! through a [`ResourceActuator`].
//!
//! ## Scoring
//!
//! `dep_check` returns a signed score:
//!
//! - negative: number of errors (dead or illegal placement, broken
//!   requirement or colocation edges, failed resources)
//! - zero: ideal
//! - positive: resources that could still be started, or moved back to a
//!   preferred node
//!
//! ## Example
//!
//! ```
//! use rgm_depends::{dep_calc_trans, dep_check, DependencyConfig, DependencyGraph, PlannerConfig, ResourceState};
//! use rgm_types::NodeId;
//!
//! let graph = DependencyGraph::build(&[DependencyConfig::new("script:app").requires("fs:/data")]);
//! let mut states = vec![ResourceState::new("script:app"), ResourceState::new("fs:/data")];
//! let online = [NodeId::new(1)];
//!
//! assert_eq!(dep_check(&graph, &mut states, &online), 2);
//! let plan = dep_calc_trans(&graph, &states, &online, &PlannerConfig::default());
//! assert_eq!(plan.score, 0);
//! assert_eq!(plan.ops[0].resource, "fs:/data");
//! ```

#![deny(unsafe_code)]

pub mod apply;
pub mod check;
pub mod error;
pub mod graph;
pub mod plan;
pub mod state;

pub use apply::{commit_step, dep_apply_trans, run_step, RecordingActuator, ResourceActuator, StepOutcome};
pub use check::{dep_check, dep_errors, dep_print_errors, dep_reset, evaluate, DepError, Evaluation};
pub use error::{DependsError, DependsResult};
pub use graph::{Colocate, DepBlock, DepTarget, DependencyConfig, DependencyGraph, Require, TargetConfig};
pub use plan::{dep_calc_trans, dep_check_operation, PlanKind, PlanOp, PlannerConfig, Transition};
pub use state::{
    dep_cluster_state, dep_rstate_alloc, find_state, AllowedNode, AllowedNodes, BrokenEdge, EdgeFault,
    ResourceState, StateFlags,
};
