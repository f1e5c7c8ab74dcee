//! State validation: `dep_check` and its error reporting.
//!
//! A check clears every error mark, then walks each resource state:
//! placement on a dead or disallowed node, unsatisfied requirements,
//! colocation conflicts and failed states. The result folds into the
//! signed score callers act on: negative means illegal, zero ideal,
//! positive the number of improvements still available.

use std::fmt;

use rgm_types::{NodeId, RgState};
use tracing::warn;

use crate::graph::{Colocate, DependencyGraph, Require};
use crate::state::{find_state, BrokenEdge, EdgeFault, ResourceState};

/// Breakdown of one check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// Placement, requirement and colocation errors.
    pub errors: u32,
    /// States in FAILED or ERROR.
    pub failed: u32,
    /// Stopped resources that could start, plus resources off their
    /// preferred node in failback domains.
    pub pending: u32,
}

impl Evaluation {
    /// Signed score: `-(errors + failed)` if any, otherwise `pending`.
    pub fn score(&self) -> i32 {
        let bad = self.errors + self.failed;
        if bad > 0 {
            -(bad as i32)
        } else {
            self.pending as i32
        }
    }

    /// Planner ordering key; failed states are outside its reach.
    pub fn rank(&self) -> (u32, u32) {
        (self.errors, self.pending)
    }

    pub fn is_ideal(&self) -> bool {
        self.score() == 0
    }
}

/// One itemized problem found by the last check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepError {
    MustColocate { resource: String, target: String },
    MustNotColocate { resource: String, target: String },
    Requires { resource: String, target: String },
    IllegalNode { resource: String, node: Option<NodeId> },
    DeadNode { resource: String, node: Option<NodeId> },
    Failed { resource: String, state: RgState },
}

fn node_num(node: &Option<NodeId>) -> u32 {
    node.map(NodeId::get).unwrap_or(0)
}

impl fmt::Display for DepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepError::MustColocate { resource, target } => {
                write!(f, "Resource {} must colocate with resource {}", resource, target)
            }
            DepError::MustNotColocate { resource, target } => {
                write!(f, "Resource {} must never colocate with resource {}", resource, target)
            }
            DepError::Requires { resource, target } => {
                write!(f, "Resource {} depends on resource {}", resource, target)
            }
            DepError::IllegalNode { resource, node } => {
                write!(f, "Resource {} on illegal node {}", resource, node_num(node))
            }
            DepError::DeadNode { resource, node } => {
                write!(f, "Resource {} on dead/offline node {}", resource, node_num(node))
            }
            DepError::Failed { resource, state } => {
                write!(f, "Resource {} is {}", resource, state)
            }
        }
    }
}

/// Count broken requirement paths below `block`, recording broken edges
/// against the state that owns each edge.
fn walk_requires(
    graph: &DependencyGraph,
    states: &[ResourceState],
    block: usize,
    owner: Option<usize>,
    path: &mut Vec<usize>,
    marks: &mut Vec<(usize, BrokenEdge)>,
) -> u32 {
    let Some(dep) = graph.block(block) else {
        return 0;
    };
    let mut errors = 0;
    for t in dep.targets.iter().filter(|t| t.require != Require::Unspec) {
        if path.contains(&t.block) {
            continue;
        }
        let target = find_state(states, &t.name);
        let broken = match target {
            Some(i) if states[i].is_running() => {
                path.push(t.block);
                let n = walk_requires(graph, states, t.block, target, path, marks);
                path.pop();
                n
            }
            _ => 1,
        };
        if broken > 0 {
            errors += broken;
            if let Some(o) = owner {
                marks.push((
                    o,
                    BrokenEdge {
                        target: t.name.clone(),
                        fault: EdgeFault::Require,
                    },
                ));
            }
        }
    }
    errors
}

/// Count always-colocate edges, followed transitively from `block`, that
/// point at `name`.
fn walk_colocate(
    graph: &DependencyGraph,
    states: &[ResourceState],
    block: usize,
    name: &str,
    path: &mut Vec<usize>,
    marks: &mut Vec<(usize, BrokenEdge)>,
) -> u32 {
    let Some(dep) = graph.block(block) else {
        return 0;
    };
    let Some(owner) = find_state(states, &dep.name) else {
        return 0;
    };
    let mut errors = 0;
    for t in dep.targets.iter().filter(|t| t.colocate == Colocate::Always) {
        if path.contains(&t.block) {
            continue;
        }
        if t.name.eq_ignore_ascii_case(name) {
            marks.push((
                owner,
                BrokenEdge {
                    target: t.name.clone(),
                    fault: EdgeFault::Colocate,
                },
            ));
            errors += 1;
        }
        path.push(t.block);
        errors += walk_colocate(graph, states, t.block, name, path, marks);
        path.pop();
    }
    errors
}

fn check_colocation(
    graph: &DependencyGraph,
    states: &[ResourceState],
    idx: usize,
    marks: &mut Vec<(usize, BrokenEdge)>,
) -> u32 {
    let me = &states[idx];
    let Some(block) = graph.blocks().iter().position(|b| b.name.eq_ignore_ascii_case(&me.name)) else {
        return 0;
    };
    let mut errors = 0;
    for other in states.iter().filter(|s| s.is_running()) {
        if other.owner != me.owner {
            errors += walk_colocate(graph, states, block, &other.name, &mut vec![block], marks);
        } else {
            for t in graph.blocks()[block]
                .targets
                .iter()
                .filter(|t| t.colocate == Colocate::Never && t.name.eq_ignore_ascii_case(&other.name))
            {
                marks.push((
                    idx,
                    BrokenEdge {
                        target: t.name.clone(),
                        fault: EdgeFault::NonColocate,
                    },
                ));
                errors += 1;
            }
        }
    }
    errors
}

/// Run the check and return its breakdown. Error marks on `states` are
/// rebuilt from scratch.
pub fn evaluate(graph: &DependencyGraph, states: &mut [ResourceState], online: &[NodeId]) -> Evaluation {
    dep_reset(states);

    let mut eval = Evaluation::default();
    let mut marks = Vec::new();
    for idx in 0..states.len() {
        let s = &states[idx];
        if s.state == RgState::Stopped && !s.candidates(online).is_empty() {
            eval.pending += 1;
        }
        if s.state.is_failed() {
            eval.failed += 1;
        }
        if !s.is_running() {
            continue;
        }

        let on_live_node = s.owner.map(|o| online.contains(&o)).unwrap_or(false);
        if !on_live_node {
            states[idx].flags.dead_node = true;
            eval.errors += 1;
        } else if !s.owner.map(|o| s.allows(o)).unwrap_or(false) {
            states[idx].flags.illegal_node = true;
            eval.errors += 1;
        } else if s.off_preferred_node(online) {
            eval.pending += 1;
        }

        let s = &states[idx];
        if let Some(block) = graph.blocks().iter().position(|b| b.name.eq_ignore_ascii_case(&s.name)) {
            eval.errors += walk_requires(graph, states, block, Some(idx), &mut vec![block], &mut marks);
        }
        eval.errors += check_colocation(graph, states, idx, &mut marks);
    }

    for (idx, edge) in marks {
        let state = &mut states[idx];
        state.flags.broken = true;
        if !state.broken.contains(&edge) {
            state.broken.push(edge);
        }
    }
    eval
}

/// Validate the current placement.
///
/// Returns a negative error count when the state is illegal, 0 when it is
/// ideal, or the number of resources that could still be started or moved
/// to a better node.
pub fn dep_check(graph: &DependencyGraph, states: &mut [ResourceState], online: &[NodeId]) -> i32 {
    evaluate(graph, states, online).score()
}

/// Clear every error mark left by a previous check.
pub fn dep_reset(states: &mut [ResourceState]) {
    for s in states.iter_mut() {
        s.clear_errors();
    }
}

/// Errors recorded by the last check: dependency edges first, then
/// placement, then failed states.
pub fn dep_errors(states: &[ResourceState]) -> Vec<DepError> {
    let mut out = Vec::new();
    for s in states {
        for edge in &s.broken {
            let (resource, target) = (s.name.clone(), edge.target.clone());
            out.push(match edge.fault {
                EdgeFault::Colocate => DepError::MustColocate { resource, target },
                EdgeFault::NonColocate => DepError::MustNotColocate { resource, target },
                EdgeFault::Require => DepError::Requires { resource, target },
            });
        }
    }
    for s in states {
        if s.flags.illegal_node {
            out.push(DepError::IllegalNode {
                resource: s.name.clone(),
                node: s.owner,
            });
        }
        if s.flags.dead_node {
            out.push(DepError::DeadNode {
                resource: s.name.clone(),
                node: s.owner,
            });
        }
    }
    for s in states.iter().filter(|s| s.state.is_failed()) {
        out.push(DepError::Failed {
            resource: s.name.clone(),
            state: s.state,
        });
    }
    out
}

/// Log every recorded error and return the messages.
pub fn dep_print_errors(states: &[ResourceState]) -> Vec<String> {
    dep_errors(states)
        .into_iter()
        .map(|e| {
            let line = e.to_string();
            warn!("{}", line);
            line
        })
        .collect()
}
