//! Transition planning.
//!
//! The planner works on a copy of the state array and searches greedily:
//! each iteration tries every single-resource move (stop, start on an
//! allowed node, relocate) and keeps the one that lowers the
//! `(errors, pending)` rank the most. It stops at the ideal state, when
//! nothing improves, or at the iteration cap.

use std::cmp::Reverse;
use std::fmt;

use rgm_types::{NodeId, RequestKind, RgState};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::check::{evaluate, Evaluation};
use crate::error::{DependsError, DependsResult};
use crate::graph::DependencyGraph;
use crate::state::{find_state, ResourceState};

fn default_max_iterations() -> u32 {
    64
}

/// Planner tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Upper bound on accepted moves per plan.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum PlanKind {
    Start { node: NodeId },
    Stop,
    Disable,
}

/// One step of a transition plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOp {
    pub resource: String,
    pub kind: PlanKind,
    /// Planner iteration that produced the step; 0 for forced stops and
    /// for the requested operation itself.
    pub iteration: u32,
}

impl PlanOp {
    pub fn start(resource: impl Into<String>, node: NodeId, iteration: u32) -> Self {
        Self {
            resource: resource.into(),
            kind: PlanKind::Start { node },
            iteration,
        }
    }

    pub fn stop(resource: impl Into<String>, iteration: u32) -> Self {
        Self {
            resource: resource.into(),
            kind: PlanKind::Stop,
            iteration,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, PlanKind::Start { .. })
    }
}

impl fmt::Display for PlanOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PlanKind::Start { node } => write!(f, "Start {} on {} [{}]", self.resource, node, self.iteration),
            PlanKind::Stop => write!(f, "Stop {} [{}]", self.resource, self.iteration),
            PlanKind::Disable => write!(f, "Disable {} [{}]", self.resource, self.iteration),
        }
    }
}

/// Result of `dep_calc_trans`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// `dep_check` score of the simulated end state.
    pub score: i32,
    pub ops: Vec<PlanOp>,
    pub iterations: u32,
}

/// Simulate a start. Refused for a resource already started in this plan
/// or when the node is the one it was just stopped on.
pub(crate) fn alter_start(state: &mut ResourceState, node: NodeId) -> bool {
    if state.flags.been_started || state.last_owner == Some(node) {
        return false;
    }
    state.state = RgState::Started;
    state.owner = Some(node);
    state.flags.been_started = true;
    state.flags.been_stopped = true;
    true
}

/// Simulate a stop. Refused for a resource already stopped in this plan.
pub(crate) fn alter_stop(state: &mut ResourceState) -> bool {
    if state.flags.been_stopped {
        return false;
    }
    state.state = RgState::Stopped;
    state.last_owner = state.owner.take();
    state.flags.been_stopped = true;
    if state.flags.illegal_node || state.flags.dead_node {
        state.last_owner = None;
        state.flags.illegal_node = false;
        state.flags.dead_node = false;
    } else if state.flags.broken {
        state.last_owner = None;
    }
    true
}

/// Stopped resources nobody depends on first, then stopped resources
/// ranked by how much they require and how many require them, then
/// running resources.
fn candidate_order(graph: &DependencyGraph, states: &[ResourceState]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..states.len()).collect();
    order.sort_by_key(|&i| {
        let s = &states[i];
        let (deps, hits) = graph.find(&s.name).map(|b| (b.deps, b.hits)).unwrap_or((0, 0));
        let class = match (s.is_running(), hits) {
            (false, 0) => 0,
            (false, _) => 1,
            (true, _) => 2,
        };
        (class, Reverse(deps), Reverse(hits))
    });
    order
}

fn moves_for(state: &ResourceState, current: &Evaluation, online: &[NodeId]) -> Vec<Vec<PlanKind>> {
    let flags = &state.flags;
    if flags.immutable
        || state.state == RgState::Disabled
        || state.state.is_failed()
        || (flags.been_started && flags.been_stopped)
    {
        return Vec::new();
    }

    let mut moves = Vec::new();
    if state.is_running() {
        moves.push(vec![PlanKind::Stop]);
        if current.errors == 0 && state.off_preferred_node(online) {
            for node in state.candidates(online) {
                if Some(node) != state.owner {
                    moves.push(vec![PlanKind::Stop, PlanKind::Start { node }]);
                }
            }
        }
    } else if state.state == RgState::Stopped && current.errors == 0 {
        for node in state.candidates(online) {
            moves.push(vec![PlanKind::Start { node }]);
        }
    }
    moves
}

fn apply_move(state: &mut ResourceState, kinds: &[PlanKind]) -> bool {
    kinds.iter().all(|kind| match *kind {
        PlanKind::Start { node } => alter_start(state, node),
        PlanKind::Stop => alter_stop(state),
        PlanKind::Disable => {
            let ok = alter_stop(state);
            state.state = RgState::Disabled;
            ok
        }
    })
}

/// Where the improvement loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Goal {
    /// No errors and nothing left to start or move.
    Ideal,
    /// No errors; stopped resources may stay stopped.
    Legal,
}

/// Greedy improvement loop over `sim`. Appends accepted steps to `ops`
/// and returns the number of iterations taken.
fn improve(
    graph: &DependencyGraph,
    sim: &mut [ResourceState],
    online: &[NodeId],
    config: &PlannerConfig,
    goal: Goal,
    ops: &mut Vec<PlanOp>,
) -> u32 {
    let mut iterations = 0;
    loop {
        let current = evaluate(graph, sim, online);
        if current.errors == 0 && (goal == Goal::Legal || current.pending == 0) {
            break;
        }
        if iterations >= config.max_iterations {
            warn!(iterations, "Transition search hit the iteration cap");
            break;
        }

        let mut best: Option<((u32, u32), usize, ResourceState, Vec<PlanKind>)> = None;
        for idx in candidate_order(graph, sim) {
            for kinds in moves_for(&sim[idx], &current, online) {
                let mut trial = sim.to_vec();
                if !apply_move(&mut trial[idx], &kinds) {
                    continue;
                }
                let rank = evaluate(graph, &mut trial, online).rank();
                if rank >= current.rank() {
                    continue;
                }
                if best.as_ref().map_or(true, |(r, ..)| rank < *r) {
                    best = Some((rank, idx, trial.swap_remove(idx), kinds));
                }
            }
        }

        let Some((rank, idx, next, kinds)) = best else {
            break;
        };
        iterations += 1;
        debug!(resource = %next.name, ?kinds, ?rank, iteration = iterations, "Accepted move");
        for kind in kinds {
            ops.push(PlanOp {
                resource: next.name.clone(),
                kind,
                iteration: iterations,
            });
        }
        sim[idx] = next;
    }
    iterations
}

/// Compute an ordered list of stops and starts that moves the cluster
/// toward a state where `dep_check` reports 0. The input is not modified.
#[instrument(skip_all, fields(resources = states.len(), online = online.len()))]
pub fn dep_calc_trans(
    graph: &DependencyGraph,
    states: &[ResourceState],
    online: &[NodeId],
    config: &PlannerConfig,
) -> Transition {
    let mut sim = states.to_vec();
    let mut ops = Vec::new();

    evaluate(graph, &mut sim, online);
    for s in sim.iter_mut() {
        if s.is_running() && (s.flags.dead_node || s.flags.illegal_node) {
            ops.push(PlanOp::stop(s.name.clone(), 0));
            s.state = RgState::Stopped;
            s.owner = None;
            s.last_owner = None;
            s.flags.dead_node = false;
            s.flags.illegal_node = false;
            s.flags.been_stopped = true;
        }
    }

    let iterations = improve(graph, &mut sim, online, config, Goal::Ideal, &mut ops);
    let score = evaluate(graph, &mut sim, online).score();
    debug!(score, steps = ops.len(), iterations, "Transition computed");
    Transition {
        score,
        ops,
        iterations,
    }
}

fn check_start(
    graph: &DependencyGraph,
    sim: &mut [ResourceState],
    idx: usize,
    op: RequestKind,
    target: Option<NodeId>,
    online: &[NodeId],
    config: &PlannerConfig,
) -> DependsResult<Vec<PlanOp>> {
    let name = sim[idx].name.clone();
    if sim[idx].is_running() {
        return match (target, sim[idx].owner) {
            (None, _) => Ok(Vec::new()),
            (Some(t), Some(owner)) if t == owner => Ok(Vec::new()),
            (_, owner) => Err(DependsError::refused(
                &name,
                op,
                format!("already running on node {}", owner.map(NodeId::get).unwrap_or(0)),
            )),
        };
    }

    let node = match target {
        Some(node) => node,
        None => sim[idx]
            .candidates(online)
            .into_iter()
            .next()
            .ok_or_else(|| DependsError::refused(&name, op, "no online allowed node"))?,
    };
    if !online.contains(&node) {
        return Err(DependsError::refused(&name, op, format!("node {} is offline", node)));
    }
    if !sim[idx].allows(node) {
        return Err(DependsError::refused(&name, op, format!("node {} is not allowed", node)));
    }

    // An administrator start clears DISABLED and FAILED.
    sim[idx].state = RgState::Stopped;
    if !alter_start(&mut sim[idx], node) {
        return Err(DependsError::refused(&name, op, "resource was already moved by this plan"));
    }
    sim[idx].flags.immutable = true;

    let mut plan = Vec::new();
    improve(graph, sim, online, config, Goal::Legal, &mut plan);
    let end = evaluate(graph, sim, online);
    if end.errors > 0 {
        return Err(DependsError::refused(
            &name,
            op,
            format!("would leave {} dependency errors", end.errors),
        ));
    }

    let split = plan.iter().take_while(|o| !o.is_start()).count();
    plan.insert(split, PlanOp::start(name, node, 0));
    Ok(plan)
}

fn check_stop(
    graph: &DependencyGraph,
    sim: &mut [ResourceState],
    idx: usize,
    op: RequestKind,
    kind: PlanKind,
    online: &[NodeId],
    config: &PlannerConfig,
) -> DependsResult<Vec<PlanOp>> {
    let name = sim[idx].name.clone();
    let requested = PlanOp {
        resource: name.clone(),
        kind,
        iteration: 0,
    };
    if !sim[idx].is_running() {
        if kind == PlanKind::Disable && sim[idx].state != RgState::Disabled {
            sim[idx].state = RgState::Disabled;
            return Ok(vec![requested]);
        }
        return Ok(Vec::new());
    }

    if !apply_move(&mut sim[idx], &[kind]) {
        return Err(DependsError::refused(&name, op, "resource was already stopped by this plan"));
    }
    sim[idx].flags.immutable = true;

    let mut plan = Vec::new();
    improve(graph, sim, online, config, Goal::Legal, &mut plan);
    let end = evaluate(graph, sim, online);
    if end.errors > 0 {
        return Err(DependsError::refused(
            &name,
            op,
            format!("would leave {} dependency errors", end.errors),
        ));
    }

    let (mut stops, starts): (Vec<PlanOp>, Vec<PlanOp>) = plan.into_iter().partition(|o| !o.is_start());
    // Dependents go down before what they depend on.
    let mut ordered: Vec<PlanOp> = Vec::with_capacity(stops.len() + starts.len() + 1);
    while !stops.is_empty() {
        let pos = (0..stops.len())
            .find(|&i| {
                !stops
                    .iter()
                    .enumerate()
                    .any(|(j, o)| j != i && graph.requires(&o.resource, &stops[i].resource))
            })
            .unwrap_or(0);
        ordered.push(stops.remove(pos));
    }
    ordered.push(requested);
    ordered.extend(starts);
    Ok(ordered)
}

/// Check whether a user operation on one resource is allowed and, if so,
/// which other resources must be stopped or started around it.
///
/// The requested resource is fixed in its new state for the duration of
/// the search, and only the moves needed to clear the errors it causes
/// are planned. The operation is refused when the resulting plan would
/// still leave dependency or placement errors.
#[instrument(skip(graph, states, online, config))]
pub fn dep_check_operation(
    name: &str,
    op: RequestKind,
    target: Option<NodeId>,
    graph: &DependencyGraph,
    states: &[ResourceState],
    online: &[NodeId],
    config: &PlannerConfig,
) -> DependsResult<Vec<PlanOp>> {
    let idx = find_state(states, name).ok_or_else(|| DependsError::state_not_found(name))?;
    let mut sim = states.to_vec();

    match op {
        RequestKind::Start | RequestKind::Enable | RequestKind::StartRemote => {
            check_start(graph, &mut sim, idx, op, target, online, config)
        }
        RequestKind::Stop | RequestKind::StopUser => {
            check_stop(graph, &mut sim, idx, op, PlanKind::Stop, online, config)
        }
        RequestKind::Disable => check_stop(graph, &mut sim, idx, op, PlanKind::Disable, online, config),
        RequestKind::Relocate => {
            let owner = sim[idx].owner.filter(|_| sim[idx].is_running());
            let target = match target {
                Some(t) if Some(t) == owner => {
                    return Err(DependsError::refused(name, op, "already running on the target node"));
                }
                Some(t) => t,
                None => sim[idx]
                    .candidates(online)
                    .into_iter()
                    .find(|n| Some(*n) != owner)
                    .ok_or_else(|| DependsError::refused(name, op, "no other online allowed node"))?,
            };
            if owner.is_none() {
                return check_start(graph, &mut sim, idx, op, Some(target), online, config);
            }

            let mut ops = check_stop(graph, &mut sim, idx, op, PlanKind::Stop, online, config)?;
            for s in sim.iter_mut() {
                s.flags.been_started = false;
                s.flags.been_stopped = false;
                s.flags.immutable = false;
            }
            ops.extend(check_start(graph, &mut sim, idx, op, Some(target), online, config)?);
            Ok(ops)
        }
        RequestKind::Migrate => Err(DependsError::Unsupported(op)),
        other => Err(DependsError::Unsupported(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Colocate, DependencyConfig, Require, TargetConfig};
    use crate::state::{AllowedNode, AllowedNodes};

    fn nodes(ids: &[u32]) -> Vec<NodeId> {
        ids.iter().map(|&i| NodeId::new(i)).collect()
    }

    fn chain() -> DependencyGraph {
        DependencyGraph::build(&[
            DependencyConfig::new("script:app").requires("fs:/data"),
            DependencyConfig::new("fs:/data").requires("ip:vip"),
        ])
    }

    fn stopped(names: &[&str]) -> Vec<ResourceState> {
        names.iter().map(|n| ResourceState::new(*n)).collect()
    }

    fn position(ops: &[PlanOp], name: &str) -> usize {
        ops.iter().position(|o| o.resource == name).unwrap()
    }

    #[test]
    fn test_calc_trans_starts_in_dependency_order() {
        let g = chain();
        let states = stopped(&["script:app", "fs:/data", "ip:vip"]);
        let t = dep_calc_trans(&g, &states, &nodes(&[1]), &PlannerConfig::default());

        assert_eq!(t.score, 0);
        assert_eq!(t.ops.len(), 3);
        assert!(t.ops.iter().all(PlanOp::is_start));
        assert!(position(&t.ops, "ip:vip") < position(&t.ops, "fs:/data"));
        assert!(position(&t.ops, "fs:/data") < position(&t.ops, "script:app"));
        // Input untouched
        assert!(states.iter().all(|s| !s.is_running()));
    }

    #[test]
    fn test_calc_trans_stops_dead_and_restarts() {
        let g = DependencyGraph::build(&[]);
        let states = vec![ResourceState::new("service:a").started_on(NodeId::new(3))];
        let t = dep_calc_trans(&g, &states, &nodes(&[1]), &PlannerConfig::default());

        assert_eq!(t.ops[0], PlanOp::stop("service:a", 0));
        assert_eq!(t.ops[1], PlanOp::start("service:a", NodeId::new(1), 1));
        assert_eq!(t.score, 0);
    }

    #[test]
    fn test_calc_trans_failback_relocates() {
        let g = DependencyGraph::build(&[]);
        let mut s = ResourceState::new("service:a")
            .with_allowed(AllowedNodes::Listed(vec![
                AllowedNode {
                    node: NodeId::new(1),
                    priority: 1,
                },
                AllowedNode {
                    node: NodeId::new(2),
                    priority: 2,
                },
            ]))
            .started_on(NodeId::new(2));
        s.flags.ordered = true;
        s.flags.failback = true;

        let t = dep_calc_trans(&g, &[s.clone()], &nodes(&[1, 2]), &PlannerConfig::default());
        assert_eq!(
            t.ops,
            vec![
                PlanOp::stop("service:a", 1),
                PlanOp::start("service:a", NodeId::new(1), 1)
            ]
        );

        s.flags.failback = false;
        let t = dep_calc_trans(&g, &[s], &nodes(&[1, 2]), &PlannerConfig::default());
        assert!(t.ops.is_empty());
    }

    #[test]
    fn test_calc_trans_respects_iteration_cap() {
        let g = DependencyGraph::build(&[]);
        let states = stopped(&["a:1", "a:2", "a:3"]);
        let config = PlannerConfig { max_iterations: 1 };
        let t = dep_calc_trans(&g, &states, &nodes(&[1]), &config);
        assert_eq!(t.iterations, 1);
        assert_eq!(t.ops.len(), 1);
        assert_eq!(t.score, 2);
    }

    #[test]
    fn test_check_start_needs_running_requirements() {
        let g = chain();
        let online = nodes(&[1]);
        let config = PlannerConfig::default();
        let mut states = stopped(&["script:app", "fs:/data", "ip:vip"]);

        let err = dep_check_operation("script:app", RequestKind::Start, None, &g, &states, &online, &config);
        assert!(matches!(err, Err(DependsError::Refused { .. })));

        states[1] = ResourceState::new("fs:/data").started_on(NodeId::new(1));
        states[2] = ResourceState::new("ip:vip").started_on(NodeId::new(1));
        let ops = dep_check_operation("script:app", RequestKind::Enable, None, &g, &states, &online, &config).unwrap();
        assert_eq!(ops, vec![PlanOp::start("script:app", NodeId::new(1), 0)]);
    }

    #[test]
    fn test_check_stop_takes_dependents_down_first() {
        let g = chain();
        let states = vec![
            ResourceState::new("script:app").started_on(NodeId::new(1)),
            ResourceState::new("fs:/data").started_on(NodeId::new(1)),
            ResourceState::new("ip:vip").started_on(NodeId::new(1)),
        ];
        let ops = dep_check_operation(
            "ip:vip",
            RequestKind::Stop,
            None,
            &g,
            &states,
            &nodes(&[1]),
            &PlannerConfig::default(),
        )
        .unwrap();

        assert_eq!(
            ops.iter().map(|o| o.resource.as_str()).collect::<Vec<_>>(),
            vec!["script:app", "fs:/data", "ip:vip"]
        );
        assert!(ops.iter().all(|o| o.kind == PlanKind::Stop));
    }

    #[test]
    fn test_check_operation_outcomes() {
        let g = DependencyGraph::build(&[DependencyConfig::new("ip:a")
            .target(TargetConfig::new("ip:b", Require::Unspec, Colocate::Never))]);
        let states = vec![
            ResourceState::new("ip:a"),
            ResourceState::new("ip:b").started_on(NodeId::new(1)),
        ];
        let online = nodes(&[1]);
        let config = PlannerConfig::default();

        // ip:b has to make room first
        let ops = dep_check_operation("ip:a", RequestKind::Start, None, &g, &states, &online, &config).unwrap();
        assert_eq!(
            ops,
            vec![PlanOp::stop("ip:b", 1), PlanOp::start("ip:a", NodeId::new(1), 0)]
        );

        let err = dep_check_operation("ip:a", RequestKind::Start, Some(NodeId::new(4)), &g, &states, &online, &config);
        assert!(matches!(err, Err(DependsError::Refused { .. })));

        let err = dep_check_operation("ip:b", RequestKind::Migrate, None, &g, &states, &online, &config);
        assert_eq!(err, Err(DependsError::Unsupported(RequestKind::Migrate)));

        let err = dep_check_operation("ip:zz", RequestKind::Start, None, &g, &states, &online, &config);
        assert!(matches!(err, Err(DependsError::NotFound(_))));

        let ok = dep_check_operation("ip:b", RequestKind::Start, None, &g, &states, &online, &config);
        assert_eq!(ok, Ok(Vec::new()));
    }

    #[test]
    fn test_relocate_is_stop_then_start() {
        let g = DependencyGraph::build(&[]);
        let states = vec![ResourceState::new("service:a").started_on(NodeId::new(1))];
        let online = nodes(&[1, 2]);
        let ops = dep_check_operation(
            "service:a",
            RequestKind::Relocate,
            Some(NodeId::new(2)),
            &g,
            &states,
            &online,
            &PlannerConfig::default(),
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![
                PlanOp::stop("service:a", 0),
                PlanOp::start("service:a", NodeId::new(2), 0)
            ]
        );

        let err = dep_check_operation(
            "service:a",
            RequestKind::Relocate,
            Some(NodeId::new(1)),
            &g,
            &states,
            &online,
            &PlannerConfig::default(),
        );
        assert!(err.is_err());
    }
}
