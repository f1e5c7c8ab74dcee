//! Offline evaluation against a cluster file and a state snapshot.
//!
//! Backs the `check`, `plan`, `graph` and `tree` subcommands: nothing here
//! runs an agent.

use std::collections::HashSet;
use std::fmt::Write;
use std::path::Path;

use rgm_depends::{
    dep_calc_trans, dep_check, dep_check_operation, dep_cluster_state, dep_print_errors, find_state, PlanOp,
    PlannerConfig, ResourceState,
};
use rgm_types::{NodeId, RequestKind, RgState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cluster::{ClusterConfig, ClusterContext};
use crate::error::{DaemonError, DaemonResult};

/// Observed state of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub name: String,
    pub state: RgState,
    #[serde(default)]
    pub owner: Option<NodeId>,
}

/// A cluster snapshot: which nodes are up and where groups run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    /// Online nodes. When absent the cluster file's liveness is used.
    #[serde(default)]
    pub online: Option<Vec<NodeId>>,
    #[serde(default)]
    pub resources: Vec<StateEntry>,
}

impl StateFile {
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Result of validating a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub score: i32,
    pub errors: Vec<String>,
    pub cluster: String,
}

/// Result of planning from a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub before: i32,
    pub after: i32,
    pub iterations: u32,
    pub ops: Vec<PlanOp>,
}

impl PlanReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Score before: {}", self.before);
        if self.ops.is_empty() {
            let _ = writeln!(out, "No transition required");
        }
        for op in &self.ops {
            let _ = writeln!(out, "  {}", op);
        }
        let _ = writeln!(out, "Score after: {} ({} iterations)", self.after, self.iterations);
        out
    }
}

pub struct Simulation {
    context: ClusterContext,
    online: Vec<NodeId>,
    states: Vec<ResourceState>,
    planner: PlannerConfig,
}

impl Simulation {
    pub fn new(config: &ClusterConfig, snapshot: &StateFile, planner: PlannerConfig) -> DaemonResult<Self> {
        let mut context = ClusterContext::build(config);
        if let Some(online) = &snapshot.online {
            let wanted: HashSet<NodeId> = online.iter().copied().collect();
            for id in context.membership.node_ids() {
                context.membership.set_online(id, wanted.contains(&id));
            }
            for id in wanted.iter().filter(|id| !context.membership.contains(**id)) {
                warn!(node = %id, "Online node is not configured; ignoring");
            }
        }
        let online = context.membership.online_ids();

        let mut states = context.allocate_states(&context.membership);
        for entry in &snapshot.resources {
            let idx = find_state(&states, &entry.name)
                .ok_or_else(|| DaemonError::group_not_found(&entry.name))?;
            states[idx].state = entry.state;
            states[idx].owner = entry.owner;
            debug!(resource = %entry.name, state = %entry.state, "Loaded state");
        }

        Ok(Self {
            context,
            online,
            states,
            planner,
        })
    }

    pub fn states(&self) -> &[ResourceState] {
        &self.states
    }

    pub fn check(&mut self) -> CheckReport {
        let score = dep_check(&self.context.graph, &mut self.states, &self.online);
        CheckReport {
            score,
            errors: dep_print_errors(&self.states),
            cluster: dep_cluster_state(&self.states, &self.online),
        }
    }

    /// Best transition from the snapshot to a legal, ideal state.
    pub fn plan(&mut self) -> PlanReport {
        let before = dep_check(&self.context.graph, &mut self.states, &self.online);
        let trans = dep_calc_trans(&self.context.graph, &self.states, &self.online, &self.planner);
        PlanReport {
            before,
            after: trans.score,
            iterations: trans.iterations,
            ops: trans.ops,
        }
    }

    /// Validate one user operation and list what it would take.
    pub fn plan_operation(
        &mut self,
        resource: &str,
        op: RequestKind,
        target: Option<NodeId>,
    ) -> DaemonResult<PlanReport> {
        let before = dep_check(&self.context.graph, &mut self.states, &self.online);
        let ops = dep_check_operation(
            resource,
            op,
            target,
            &self.context.graph,
            &self.states,
            &self.online,
            &self.planner,
        )?;
        let mut after_states = self.states.clone();
        simulate(&mut after_states, &ops);
        let after = dep_check(&self.context.graph, &mut after_states, &self.online);
        Ok(PlanReport {
            before,
            after,
            iterations: ops.iter().map(|o| o.iteration).max().unwrap_or(0),
            ops,
        })
    }

    /// DOT rendering with the edges broken in the snapshot dashed.
    pub fn graph_dot(&mut self) -> String {
        dep_check(&self.context.graph, &mut self.states, &self.online);
        self.context.graph.print_depends_dot(&self.states)
    }

    pub fn depends_text(&self) -> String {
        self.context.graph.print_depends()
    }

    pub fn tree_text(&self) -> String {
        self.context.tree.print_resource_tree()
    }
}

/// Apply plan steps to a copy of the state table without running anything.
fn simulate(states: &mut [ResourceState], ops: &[PlanOp]) {
    use rgm_depends::PlanKind;
    for op in ops {
        let Some(idx) = find_state(states, &op.resource) else {
            continue;
        };
        let s = &mut states[idx];
        match op.kind {
            PlanKind::Start { node } => {
                s.state = RgState::Started;
                s.owner = Some(node);
            }
            PlanKind::Stop => {
                s.state = RgState::Stopped;
                s.last_owner = s.owner.take();
            }
            PlanKind::Disable => {
                s.state = RgState::Disabled;
                s.last_owner = s.owner.take();
            }
        }
    }
}
