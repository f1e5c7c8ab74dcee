//! Per-resource evaluator state and its allocation from the resource tree.

use std::fmt::Write as _;

use rgm_domain::FailoverDomains;
use rgm_restree::ResourceTree;
use rgm_types::{Membership, NodeId, RgState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Evaluator flags on a resource state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFlags {
    #[serde(default)]
    pub illegal_node: bool,
    #[serde(default)]
    pub dead_node: bool,
    /// One of this resource's dependency edges is broken.
    #[serde(default)]
    pub broken: bool,
    #[serde(default)]
    pub been_started: bool,
    #[serde(default)]
    pub been_stopped: bool,
    /// Pinned by an administrative operation; the planner will not move it.
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub ordered: bool,
    #[serde(default)]
    pub failback: bool,
}

/// Kind of a broken dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeFault {
    Require,
    Colocate,
    NonColocate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenEdge {
    pub target: String,
    pub fault: EdgeFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedNode {
    pub node: NodeId,
    /// Domain priority, 0 when unprioritized or not a member.
    #[serde(default)]
    pub priority: u32,
}

/// Nodes a resource may run on, in placement preference order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedNodes {
    #[default]
    Any,
    Listed(Vec<AllowedNode>),
}

/// Evaluator view of one top-level resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// `type:primary`.
    pub name: String,
    pub state: RgState,
    #[serde(default)]
    pub owner: Option<NodeId>,
    #[serde(default)]
    pub last_owner: Option<NodeId>,
    #[serde(default)]
    pub allowed: AllowedNodes,
    #[serde(default)]
    pub flags: StateFlags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub broken: Vec<BrokenEdge>,
}

impl ResourceState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RgState::Stopped,
            owner: None,
            last_owner: None,
            allowed: AllowedNodes::Any,
            flags: StateFlags::default(),
            broken: Vec::new(),
        }
    }

    pub fn with_allowed(mut self, allowed: AllowedNodes) -> Self {
        self.allowed = allowed;
        self
    }

    /// Mark as started on `node`.
    pub fn started_on(mut self, node: impl Into<NodeId>) -> Self {
        self.state = RgState::Started;
        self.owner = Some(node.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn allows(&self, node: NodeId) -> bool {
        match &self.allowed {
            AllowedNodes::Any => true,
            AllowedNodes::Listed(nodes) => nodes.iter().any(|a| a.node == node),
        }
    }

    /// Online allowed nodes in preference order.
    pub fn candidates(&self, online: &[NodeId]) -> Vec<NodeId> {
        match &self.allowed {
            AllowedNodes::Any => online.to_vec(),
            AllowedNodes::Listed(nodes) => nodes
                .iter()
                .map(|a| a.node)
                .filter(|n| online.contains(n))
                .collect(),
        }
    }

    /// Whether an ORDERED+FAILBACK resource runs somewhere other than an
    /// online allowed node of the best online priority.
    pub fn off_preferred_node(&self, online: &[NodeId]) -> bool {
        if !(self.flags.ordered && self.flags.failback) || !self.is_running() {
            return false;
        }
        let AllowedNodes::Listed(nodes) = &self.allowed else {
            return false;
        };
        let best = nodes
            .iter()
            .filter(|a| online.contains(&a.node))
            .map(|a| a.priority)
            .min();
        let mine = self
            .owner
            .and_then(|o| nodes.iter().find(|a| a.node == o))
            .map(|a| a.priority);
        match (best, mine) {
            (Some(best), Some(mine)) => mine > best,
            _ => false,
        }
    }

    pub fn has_broken_edge(&self, target: &str, fault: EdgeFault) -> bool {
        self.broken
            .iter()
            .any(|b| b.fault == fault && b.target.eq_ignore_ascii_case(target))
    }

    pub(crate) fn clear_errors(&mut self) {
        self.flags.illegal_node = false;
        self.flags.dead_node = false;
        self.flags.broken = false;
        self.broken.clear();
    }
}

/// Case-insensitive state lookup.
pub fn find_state(states: &[ResourceState], name: &str) -> Option<usize> {
    states
        .iter()
        .position(|s| s.name.eq_ignore_ascii_case(name))
}

fn set_allowed(state: &mut ResourceState, domain: Option<&rgm_domain::FailoverDomain>, membership: &Membership) {
    let Some(domain) = domain else {
        state.allowed = AllowedNodes::Any;
        return;
    };

    let mut allowed: Vec<AllowedNode> = domain
        .members_by_priority()
        .into_iter()
        .map(|m| AllowedNode {
            node: m.id,
            priority: m.priority,
        })
        .collect();

    if domain.flags.ordered {
        state.flags.ordered = true;
        state.flags.failback = !domain.flags.nofailback;
    }

    if !domain.flags.restricted {
        let fill: Vec<AllowedNode> = membership
            .node_ids()
            .into_iter()
            .filter(|id| !allowed.iter().any(|a| a.node == *id))
            .map(|node| AllowedNode {
                node,
                // Non-members rank after every member.
                priority: u32::MAX,
            })
            .collect();
        allowed.extend(fill);
    }
    state.allowed = AllowedNodes::Listed(allowed);
}

/// One STOPPED state per top-level resource of the tree.
///
/// The failover domain is the resource's `domain` attribute, or the
/// service binding recorded in `domains`. Unknown domains allow any node.
pub fn dep_rstate_alloc(tree: &ResourceTree, domains: &FailoverDomains, membership: &Membership) -> Vec<ResourceState> {
    let mut states = Vec::with_capacity(tree.roots().len());
    for &root in tree.roots() {
        let Some(resource) = tree.node_resource(root) else {
            continue;
        };
        let name = resource.name();
        let mut state = ResourceState::new(name.clone());

        let domain_name = resource
            .literal("domain")
            .map(str::to_string)
            .or_else(|| domains.domain_of(&name).map(str::to_string));
        let domain = match &domain_name {
            Some(d) => {
                let found = domains.find(d);
                if found.is_none() {
                    warn!(resource = %name, domain = %d, "Unknown failover domain; allowing any node");
                }
                found
            }
            None => None,
        };
        set_allowed(&mut state, domain, membership);
        debug!(resource = %name, allowed = ?state.allowed, "Resource state allocated");
        states.push(state);
    }
    states
}

/// Text dump of where everything runs.
pub fn dep_cluster_state(states: &[ResourceState], online: &[NodeId]) -> String {
    let mut out = String::new();
    for node in online {
        let _ = writeln!(out, "Node {}", node);
        for s in states.iter().filter(|s| s.is_running() && s.owner == Some(*node)) {
            if s.allows(*node) {
                let _ = writeln!(out, "\t{}", s.name);
            } else {
                let _ = writeln!(out, "\t[ILLEGAL] {}", s.name);
            }
        }
        out.push('\n');
    }

    let dead: Vec<&ResourceState> = states.iter().filter(|s| s.flags.dead_node).collect();
    if !dead.is_empty() {
        out.push_str("Resources on dead nodes:\n");
        for s in dead {
            let _ = writeln!(out, "\t{}", s.name);
        }
        out.push('\n');
    }

    out.push_str("Stopped resources:\n");
    for s in states.iter().filter(|s| s.state == RgState::Stopped) {
        let _ = writeln!(out, "\t{};", s.name);
    }
    out.push('\n');

    out.push_str("Disabled resources:\n");
    for s in states.iter().filter(|s| s.state == RgState::Disabled) {
        let _ = writeln!(out, "\t{};", s.name);
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgm_domain::{DomainConfig, DomainFlags, DomainMemberConfig};
    use rgm_restree::{ChildType, ResourceList, ResourceRule, RuleAttr, RuleRegistry, TreeEntry};
    use rgm_types::Member;

    fn membership() -> Membership {
        Membership::new((1..=3).map(|i| Member::new(i, format!("node{}", i), true)).collect())
    }

    fn domain(name: &str, flags: DomainFlags, nodes: &[(&str, i64)]) -> DomainConfig {
        DomainConfig {
            name: name.into(),
            flags,
            nodes: nodes
                .iter()
                .map(|(n, p)| DomainMemberConfig {
                    name: n.to_string(),
                    priority: *p,
                })
                .collect(),
        }
    }

    fn tree() -> ResourceTree {
        let rules = RuleRegistry::build([ResourceRule::new("service")
            .as_root()
            .with_attr(RuleAttr::new("name").primary())
            .with_attr(RuleAttr::new("domain"))
            .with_child(ChildType::new("script"))]);
        ResourceTree::build(
            &rules,
            ResourceList::new(),
            &[
                TreeEntry::inline("service").attr("name", "free"),
                TreeEntry::inline("service").attr("name", "ord").attr("domain", "ordered"),
                TreeEntry::inline("service").attr("name", "res").attr("domain", "restricted"),
                TreeEntry::inline("service").attr("name", "typo").attr("domain", "nosuch"),
            ],
        )
    }

    #[test]
    fn test_rstate_alloc_allowed_lists() {
        let m = membership();
        let domains = FailoverDomains::build(
            &[
                domain(
                    "ordered",
                    DomainFlags { ordered: true, ..Default::default() },
                    &[("node3", 1), ("node2", 2)],
                ),
                domain(
                    "restricted",
                    DomainFlags { restricted: true, nofailback: true, ..Default::default() },
                    &[("node2", 0)],
                ),
            ],
            &m,
        );
        let states = dep_rstate_alloc(&tree(), &domains, &m);
        assert_eq!(states.len(), 4);
        assert!(states.iter().all(|s| s.state == RgState::Stopped && s.owner.is_none()));

        assert_eq!(states[0].allowed, AllowedNodes::Any);

        let ord = &states[1];
        assert!(ord.flags.ordered && ord.flags.failback);
        let AllowedNodes::Listed(nodes) = &ord.allowed else {
            panic!("expected listed nodes");
        };
        let ids: Vec<u32> = nodes.iter().map(|a| a.node.get()).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        let res = &states[2];
        assert!(!res.flags.ordered);
        assert!(res.allows(NodeId::new(2)) && !res.allows(NodeId::new(1)));

        assert_eq!(states[3].allowed, AllowedNodes::Any);
    }

    #[test]
    fn test_off_preferred_node() {
        let allowed = AllowedNodes::Listed(vec![
            AllowedNode { node: NodeId::new(1), priority: 1 },
            AllowedNode { node: NodeId::new(2), priority: 2 },
        ]);
        let mut s = ResourceState::new("service:a").with_allowed(allowed).started_on(2);
        s.flags.ordered = true;
        s.flags.failback = true;
        let both = [NodeId::new(1), NodeId::new(2)];
        assert!(s.off_preferred_node(&both));
        assert!(!s.off_preferred_node(&[NodeId::new(2)]));
        s.flags.failback = false;
        assert!(!s.off_preferred_node(&both));
    }

    #[test]
    fn test_cluster_state_text() {
        let states = vec![
            ResourceState::new("service:a").started_on(1),
            ResourceState::new("service:b")
                .with_allowed(AllowedNodes::Listed(vec![AllowedNode { node: NodeId::new(2), priority: 0 }]))
                .started_on(1),
            ResourceState::new("service:c"),
        ];
        let text = dep_cluster_state(&states, &[NodeId::new(1)]);
        assert_eq!(
            text,
            "Node 1\n\tservice:a\n\t[ILLEGAL] service:b\n\nStopped resources:\n\tservice:c;\n\nDisabled resources:\n\n"
        );
    }
}
