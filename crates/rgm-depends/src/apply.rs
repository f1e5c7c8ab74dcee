//! Plan execution.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use rgm_types::{NodeId, RgState};
use tracing::{info, instrument, warn};

use crate::error::{DependsError, DependsResult};
use crate::plan::{PlanKind, PlanOp};
use crate::state::{find_state, ResourceState};

/// What an actuator did with a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran here; the resource is in its new state.
    Done,
    /// The step belongs to another node. The state is left as it was
    /// until that node reports back.
    Delegated,
}

/// Carries out individual plan steps against real resources.
#[async_trait]
pub trait ResourceActuator: Send + Sync {
    /// Start a resource on a node.
    async fn start(&self, resource: &str, node: NodeId) -> DependsResult<StepOutcome>;

    /// Stop a resource wherever it runs.
    async fn stop(&self, resource: &str) -> DependsResult<StepOutcome>;
}

/// Hand one plan step to the actuator.
pub async fn run_step(op: &PlanOp, actuator: &dyn ResourceActuator) -> DependsResult<StepOutcome> {
    match op.kind {
        PlanKind::Start { node } => actuator.start(&op.resource, node).await,
        PlanKind::Stop | PlanKind::Disable => actuator.stop(&op.resource).await,
    }
}

/// Record the result of step `step` in `states`.
///
/// A failed step marks its resource FAILED and comes back as
/// [`DependsError::StepFailed`]. Delegated steps leave the state alone.
pub fn commit_step(
    states: &mut [ResourceState],
    step: usize,
    op: &PlanOp,
    result: DependsResult<StepOutcome>,
) -> DependsResult<StepOutcome> {
    let idx = find_state(states, &op.resource).ok_or_else(|| DependsError::StepFailed {
        step,
        resource: op.resource.clone(),
        reason: "no such resource".to_string(),
    })?;
    let state = &mut states[idx];

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(step, resource = %op.resource, error = %e, "Plan step failed; aborting");
            if let PlanKind::Start { node } = op.kind {
                state.last_owner = Some(node);
                state.owner = None;
            }
            state.state = RgState::Failed;
            return Err(DependsError::StepFailed {
                step,
                resource: op.resource.clone(),
                reason: e.to_string(),
            });
        }
    };

    if outcome == StepOutcome::Delegated {
        info!(step, resource = %op.resource, "Step delegated to owning node");
        return Ok(outcome);
    }

    match op.kind {
        PlanKind::Start { node } => {
            state.state = RgState::Started;
            state.owner = Some(node);
        }
        PlanKind::Stop | PlanKind::Disable => {
            state.state = if op.kind == PlanKind::Disable {
                RgState::Disabled
            } else {
                RgState::Stopped
            };
            state.last_owner = state.owner.take();
        }
    }
    state.flags.illegal_node = false;
    state.flags.dead_node = false;
    info!(step, "{}", op);
    Ok(outcome)
}

/// Execute `ops` in order, updating `states` after each successful step.
///
/// The first failing step marks its resource FAILED and ends the run;
/// later steps are never invoked. A delegated step also ends the run,
/// since what follows may depend on it. Returns the number of steps
/// carried out here.
#[instrument(skip_all, fields(steps = ops.len()))]
pub async fn dep_apply_trans(
    states: &mut [ResourceState],
    ops: &[PlanOp],
    actuator: &dyn ResourceActuator,
) -> DependsResult<usize> {
    for (step, op) in ops.iter().enumerate() {
        if find_state(states, &op.resource).is_none() {
            return Err(DependsError::StepFailed {
                step,
                resource: op.resource.clone(),
                reason: "no such resource".to_string(),
            });
        }

        let result = run_step(op, actuator).await;
        if commit_step(states, step, op, result)? == StepOutcome::Delegated {
            info!(applied = step, remaining = ops.len() - step, "Plan handed off");
            return Ok(step);
        }
    }

    info!(applied = ops.len(), "Plan applied");
    Ok(ops.len())
}

/// Actuator that records calls instead of touching resources.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashSet<String>>,
    remote: Mutex<HashSet<String>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call on `resource` fail.
    pub fn fail_on(&self, resource: &str) {
        self.failures.lock().insert(resource.to_string());
    }

    /// Report every later call on `resource` as delegated.
    pub fn delegate(&self, resource: &str) {
        self.remote.lock().insert(resource.to_string());
    }

    /// Calls so far, as `start <name> on <node>` or `stop <name>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn outcome(&self, resource: &str) -> DependsResult<StepOutcome> {
        if self.failures.lock().contains(resource) {
            return Err(DependsError::Actuator {
                resource: resource.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if self.remote.lock().contains(resource) {
            return Ok(StepOutcome::Delegated);
        }
        Ok(StepOutcome::Done)
    }
}

#[async_trait]
impl ResourceActuator for RecordingActuator {
    async fn start(&self, resource: &str, node: NodeId) -> DependsResult<StepOutcome> {
        self.calls.lock().push(format!("start {} on {}", resource, node));
        self.outcome(resource)
    }

    async fn stop(&self, resource: &str) -> DependsResult<StepOutcome> {
        self.calls.lock().push(format!("stop {}", resource));
        self.outcome(resource)
    }
}
