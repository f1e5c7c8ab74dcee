//! RGM Daemon library
//!
//! This module provides the core components for the resource-group
//! manager daemon:
//! - Layered daemon configuration and the cluster file
//! - The request engine behind every group worker
//! - The reconciliation loop driven by ticks and membership events
//! - Offline evaluation of cluster snapshots

#![deny(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod offline;
pub mod scheduler;

pub use cluster::{ClusterConfig, ClusterContext};
pub use config::DaemonConfig;
pub use engine::{GroupEngine, ReconcileReport, TreeActuator};
pub use error::{DaemonError, DaemonResult};
pub use offline::{CheckReport, PlanReport, Simulation, StateEntry, StateFile};
pub use scheduler::{MembershipEvent, Reconciler};
