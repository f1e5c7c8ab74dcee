//! Level-ordered operations over the resource tree.
//!
//! Start and status visit a node before its children; children run by
//! start level, then the children whose type has no start level. Stop
//! visits children first: unleveled children in reverse, then by stop
//! level, then the node itself.

use tracing::{debug, info, instrument, warn};

use crate::error::{RestreeError, RestreeResult};
use crate::ocf::{AgentExecutor, AgentInvocation, AgentOutcome, AgentSettings, OcfOperation};
use crate::rules::RESOURCE_MAX_LEVELS;
use crate::tree::{NodeState, ResourceTree, TreeNodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOp {
    Start,
    Stop,
    Status,
    /// Start only nodes flagged NEEDSTART, with their subtrees.
    CondStart,
    /// Stop only nodes flagged NEEDSTOP, with their subtrees.
    CondStop,
}

impl TreeOp {
    fn is_stop(self) -> bool {
        matches!(self, TreeOp::Stop | TreeOp::CondStop)
    }
}

/// Result of a status pass that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    Healthy,
    /// Failures confined to independent subtrees, by resource name.
    Recoverable(Vec<String>),
}

#[derive(Debug, Clone, Copy)]
struct Step {
    node: TreeNodeId,
    operation: OcfOperation,
    /// Whether this step runs, after conditional filtering.
    run: bool,
    /// Inside an independent subtree below the starting node.
    independent: bool,
    /// One past the last step of this node's subtree, for preorder plans.
    end: usize,
}

/// Children of `id`, in execution order for `op`.
fn ordered_children(tree: &ResourceTree, id: TreeNodeId, op: TreeOp) -> Vec<TreeNodeId> {
    let (Some(node), Some(resource)) = (tree.node(id), tree.node_resource(id)) else {
        return Vec::new();
    };
    let level_of = |child: TreeNodeId| {
        let rtype = tree.node_resource(child).map(|r| r.rtype().to_string())?;
        let ct = resource.rule.child_type(&rtype)?;
        if op.is_stop() {
            ct.stop_level
        } else {
            ct.start_level
        }
    };

    let mut leveled = Vec::new();
    for level in 1..=RESOURCE_MAX_LEVELS {
        leveled.extend(
            node.children
                .iter()
                .copied()
                .filter(|&c| level_of(c) == Some(level)),
        );
    }
    let mut unleveled: Vec<TreeNodeId> = node
        .children
        .iter()
        .copied()
        .filter(|&c| level_of(c).is_none())
        .collect();

    if op.is_stop() {
        unleveled.reverse();
        unleveled.extend(leveled);
        unleveled
    } else {
        leveled.extend(unleveled);
        leveled
    }
}

fn plan(
    tree: &ResourceTree,
    id: TreeNodeId,
    op: TreeOp,
    forced: bool,
    independent: bool,
    top: bool,
    out: &mut Vec<Step>,
) {
    let Some(node) = tree.node(id) else {
        return;
    };
    let forced = forced
        || match op {
            TreeOp::CondStart => node.flags.needstart,
            TreeOp::CondStop => node.flags.needstop,
            _ => true,
        };
    let operation = match op {
        TreeOp::Start | TreeOp::CondStart => OcfOperation::Start,
        TreeOp::Stop | TreeOp::CondStop => OcfOperation::Stop,
        TreeOp::Status => OcfOperation::Status,
    };
    // The starting node's own INDEPENDENT flag does not make it recoverable.
    let independent = independent || (!top && node.flags.independent);
    let children = ordered_children(tree, id, op);

    if op.is_stop() {
        for child in children {
            plan(tree, child, op, forced, independent, false, out);
        }
        let end = out.len() + 1;
        out.push(Step {
            node: id,
            operation,
            run: forced,
            independent,
            end,
        });
    } else {
        let me = out.len();
        out.push(Step {
            node: id,
            operation,
            run: forced,
            independent,
            end: me + 1,
        });
        for child in children {
            plan(tree, child, op, forced, independent, false, out);
        }
        out[me].end = out.len();
    }
}

/// Build the ordered step list for `first`, or for every top-level node.
fn build_plan(tree: &ResourceTree, first: Option<TreeNodeId>, op: TreeOp) -> Vec<Step> {
    let mut roots: Vec<TreeNodeId> = match first {
        Some(id) => vec![id],
        None => tree.roots().to_vec(),
    };
    if op.is_stop() {
        roots.reverse();
    }
    let mut steps = Vec::new();
    for root in roots {
        plan(tree, root, op, false, false, true, &mut steps);
    }
    steps
}

async fn invoke(
    tree: &ResourceTree,
    step: &Step,
    depth: u32,
    executor: &dyn AgentExecutor,
    settings: &AgentSettings,
) -> RestreeResult<AgentOutcome> {
    match AgentInvocation::for_node(tree, step.node, step.operation, depth, settings) {
        Some(invocation) => executor.exec(&invocation).await,
        None => Ok(AgentOutcome::SUCCESS),
    }
}

fn failure(tree: &ResourceTree, step: &Step, outcome: AgentOutcome) -> RestreeError {
    RestreeError::AgentFailed {
        resource: tree
            .node_resource(step.node)
            .map(|r| r.name())
            .unwrap_or_default(),
        operation: step.operation.to_string(),
        outcome,
    }
}

async fn run_transition(
    tree: &mut ResourceTree,
    first: Option<TreeNodeId>,
    op: TreeOp,
    executor: &dyn AgentExecutor,
    settings: &AgentSettings,
) -> RestreeResult<()> {
    let steps = build_plan(tree, first, op);
    for step in steps.iter().filter(|s| s.run) {
        let outcome = invoke(tree, step, 0, executor, settings).await?;
        let Some(node) = tree.node_mut(step.node) else {
            continue;
        };
        if !outcome.is_success() {
            node.state = NodeState::Failed;
            let err = failure(tree, step, outcome);
            warn!(error = %err, "Aborting resource tree operation");
            return Err(err);
        }

        let rid = node.resource;
        match step.operation {
            OcfOperation::Start => {
                node.state = NodeState::Started;
                node.flags.needstart = false;
                if let Some(r) = tree.resource_mut(rid) {
                    r.incarnations += 1;
                    r.flags.needstart = false;
                }
            }
            _ => {
                node.state = NodeState::Stopped;
                node.flags.needstop = false;
                if let Some(r) = tree.resource_mut(rid) {
                    r.incarnations = r.incarnations.saturating_sub(1);
                    r.flags.needstop = false;
                }
            }
        }
        debug!(node = step.node.0, operation = %step.operation, "Resource operation complete");
    }
    Ok(())
}

/// Start `first` (or every top-level resource), aborting on the first
/// agent failure.
#[instrument(skip(tree, executor, settings))]
pub async fn res_start(
    tree: &mut ResourceTree,
    first: Option<TreeNodeId>,
    executor: &dyn AgentExecutor,
    settings: &AgentSettings,
) -> RestreeResult<()> {
    run_transition(tree, first, TreeOp::Start, executor, settings).await
}

/// Stop `first` (or every top-level resource in reverse), aborting on the
/// first agent failure.
#[instrument(skip(tree, executor, settings))]
pub async fn res_stop(
    tree: &mut ResourceTree,
    first: Option<TreeNodeId>,
    executor: &dyn AgentExecutor,
    settings: &AgentSettings,
) -> RestreeResult<()> {
    run_transition(tree, first, TreeOp::Stop, executor, settings).await
}

pub async fn res_condstart(
    tree: &mut ResourceTree,
    first: Option<TreeNodeId>,
    executor: &dyn AgentExecutor,
    settings: &AgentSettings,
) -> RestreeResult<()> {
    run_transition(tree, first, TreeOp::CondStart, executor, settings).await
}

pub async fn res_condstop(
    tree: &mut ResourceTree,
    first: Option<TreeNodeId>,
    executor: &dyn AgentExecutor,
    settings: &AgentSettings,
) -> RestreeResult<()> {
    run_transition(tree, first, TreeOp::CondStop, executor, settings).await
}

/// Check the health of `first` (or every top-level resource).
///
/// A failing node and its subtree are marked failed with NEEDSTART and
/// NEEDSTOP. Failures inside an independent subtree are collected and the
/// pass continues with the next sibling; any other failure ends the pass
/// with an error.
#[instrument(skip(tree, executor, settings))]
pub async fn res_status(
    tree: &mut ResourceTree,
    first: Option<TreeNodeId>,
    depth: u32,
    executor: &dyn AgentExecutor,
    settings: &AgentSettings,
) -> RestreeResult<StatusReport> {
    let steps = build_plan(tree, first, TreeOp::Status);
    let mut recoverable = Vec::new();
    let mut i = 0;
    while i < steps.len() {
        let step = steps[i];
        let outcome = invoke(tree, &step, depth, executor, settings).await?;
        if outcome.is_success() {
            i += 1;
            continue;
        }

        for s in &steps[i..step.end] {
            if let Some(node) = tree.node_mut(s.node) {
                node.state = NodeState::Failed;
                node.flags.needstart = true;
                node.flags.needstop = true;
            }
        }
        let err = failure(tree, &step, outcome);
        if !step.independent {
            warn!(error = %err, "Status check failed");
            return Err(err);
        }
        info!(error = %err, "Status check failed in independent subtree");
        if let RestreeError::AgentFailed { resource, .. } = err {
            recoverable.push(resource);
        }
        i = step.end;
    }

    if recoverable.is_empty() {
        Ok(StatusReport::Healthy)
    } else {
        Ok(StatusReport::Recoverable(recoverable))
    }
}

/// Resolved attributes of the resource named `type:primary`.
pub fn res_resinfo(tree: &ResourceTree, name: &str) -> RestreeResult<Vec<(String, String)>> {
    let node = tree
        .find_node(name)
        .ok_or_else(|| RestreeError::resource_not_found(name))?;
    Ok(tree.resolved_attrs(node))
}
