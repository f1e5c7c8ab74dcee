//! Shared builders for the cross-crate scenario and property tests.

use rgm_depends::{DependencyConfig, DependencyGraph, ResourceState};
use rgm_domain::{DomainConfig, DomainFlags, DomainMemberConfig, FailoverDomains};
use rgm_types::{Member, Membership, NodeId};

pub fn nodes(ids: &[u32]) -> Vec<NodeId> {
    ids.iter().map(|&i| NodeId::new(i)).collect()
}

/// Nodes `node1..=nodeN`, with the listed ids online.
pub fn membership(count: u32, online: &[u32]) -> Membership {
    Membership::new(
        (1..=count)
            .map(|id| Member::new(NodeId::new(id), format!("node{}", id), online.contains(&id)))
            .collect(),
    )
}

/// One domain named `dom` with `node1` at priority 1 and `node2` at
/// priority 2, bound to `service`.
pub fn two_node_domain(flags: DomainFlags, membership: &Membership, service: &str) -> FailoverDomains {
    let config = DomainConfig {
        name: "dom".into(),
        flags,
        nodes: vec![
            DomainMemberConfig {
                name: "node1".into(),
                priority: 1,
            },
            DomainMemberConfig {
                name: "node2".into(),
                priority: 2,
            },
        ],
    };
    let mut domains = FailoverDomains::build(&[config], membership);
    domains.assign(service, "dom");
    domains
}

/// `script:app` requires `fs:/data`; `ip:10.0.0.1` stands alone.
pub fn app_graph() -> DependencyGraph {
    DependencyGraph::build(&[DependencyConfig::new("script:app").requires("fs:/data")])
}

pub fn app_states() -> Vec<ResourceState> {
    ["ip:10.0.0.1", "fs:/data", "script:app"]
        .into_iter()
        .map(ResourceState::new)
        .collect()
}

/// Position of the first plan step touching `resource`.
pub fn step_of(ops: &[rgm_depends::PlanOp], resource: &str) -> Option<usize> {
    ops.iter().position(|o| o.resource == resource)
}
