//! Cluster configuration and the runtime snapshot built from it.
//!
//! A [`ClusterContext`] is immutable once built. Reconfiguration builds a
//! new one and swaps the `Arc`; nothing is patched in place except the
//! per-group resource trees, each behind its own async mutex so that
//! different groups can run agents at the same time.

use std::collections::HashMap;
use std::path::Path;

use rgm_depends::{dep_rstate_alloc, DependencyConfig, DependencyGraph, ResourceState};
use rgm_domain::{DomainConfig, FailoverDomains};
use rgm_restree::{ResourceConfig, ResourceList, ResourceRule, ResourceTree, RuleRegistry, TreeEntry};
use rgm_types::{Member, Membership};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DaemonResult;

/// Everything the evaluator and tree builder need, as read from the
/// configuration source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub nodes: Vec<Member>,
    #[serde(default)]
    pub rules: Vec<ResourceRule>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
}

impl ClusterConfig {
    /// Read a cluster file in any format the `config` crate understands.
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

/// Immutable runtime view of one configuration generation.
pub struct ClusterContext {
    /// Configured nodes with their initial liveness.
    pub membership: Membership,
    pub rules: RuleRegistry,
    /// Every top-level group in one tree.
    pub tree: ResourceTree,
    pub domains: FailoverDomains,
    pub graph: DependencyGraph,
    groups: HashMap<String, Mutex<ResourceTree>>,
}

impl ClusterContext {
    pub fn build(config: &ClusterConfig) -> Self {
        let membership = Membership::new(config.nodes.clone());
        let rules = RuleRegistry::build(config.rules.iter().cloned());
        let resources = ResourceList::build(&rules, &config.resources);
        let domains = FailoverDomains::build(&config.domains, &membership);
        let graph = DependencyGraph::build(&config.dependencies);

        let mut groups = HashMap::new();
        for entry in &config.tree {
            let tree = ResourceTree::build(&rules, resources.clone(), std::slice::from_ref(entry));
            let name = tree
                .roots()
                .first()
                .and_then(|&root| tree.node_resource(root))
                .map(|r| r.name());
            if let Some(name) = name {
                debug!(group = %name, nodes = tree.len(), "Group tree built");
                groups.insert(name.to_ascii_lowercase(), Mutex::new(tree));
            }
        }
        let tree = ResourceTree::build(&rules, resources, &config.tree);

        info!(
            nodes = membership.len(),
            rules = rules.len(),
            groups = groups.len(),
            domains = domains.len(),
            dependencies = graph.len(),
            "Cluster configuration loaded"
        );

        Self {
            membership,
            rules,
            tree,
            domains,
            graph,
            groups,
        }
    }

    /// The resource tree a group's agents run against.
    pub fn group_tree(&self, group: &str) -> Option<&Mutex<ResourceTree>> {
        self.groups.get(&group.to_ascii_lowercase())
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(&group.to_ascii_lowercase())
    }

    /// Group names, in tree order.
    pub fn group_names(&self) -> Vec<String> {
        self.tree
            .roots()
            .iter()
            .filter_map(|&root| self.tree.node_resource(root))
            .map(|r| r.name())
            .collect()
    }

    /// Fresh STOPPED states for every group.
    pub fn allocate_states(&self, membership: &Membership) -> Vec<ResourceState> {
        dep_rstate_alloc(&self.tree, &self.domains, membership)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rgm_depends::DependencyConfig;
    use rgm_restree::{ChildType, RuleAttr};

    /// Three groups on two nodes: `service:app` requires `service:db`;
    /// `service:web` is pinned to node 1 by a restricted domain.
    pub fn cluster() -> ClusterConfig {
        let service = ResourceRule::new("service")
            .as_root()
            .with_attr(RuleAttr::new("name").primary())
            .with_attr(RuleAttr::new("domain"))
            .with_child(ChildType::new("ip").levels(1, 2))
            .with_child(ChildType::new("script").levels(2, 1));
        let ip = ResourceRule::new("ip")
            .with_agent("ip.sh")
            .with_attr(RuleAttr::new("address").primary());
        let script = ResourceRule::new("script")
            .with_agent("script.sh")
            .with_attr(RuleAttr::new("name").primary())
            .with_attr(RuleAttr::new("service_name").inherit("service%name"));

        ClusterConfig {
            nodes: vec![Member::new(1u32, "node1", true), Member::new(2u32, "node2", true)],
            rules: vec![service, ip, script],
            resources: vec![ResourceConfig::new("ip").attr("address", "10.0.0.1")],
            tree: vec![
                TreeEntry::inline("service")
                    .attr("name", "db")
                    .child(TreeEntry::reference("ip", "10.0.0.1")),
                TreeEntry::inline("service")
                    .attr("name", "app")
                    .child(TreeEntry::inline("script").attr("name", "app")),
                TreeEntry::inline("service").attr("name", "web").attr("domain", "pinned"),
            ],
            domains: vec![DomainConfig {
                name: "pinned".into(),
                flags: rgm_domain::DomainFlags {
                    ordered: false,
                    restricted: true,
                    nofailback: false,
                },
                nodes: vec![rgm_domain::DomainMemberConfig {
                    name: "node1".into(),
                    priority: 0,
                }],
            }],
            dependencies: vec![DependencyConfig::new("service:app").requires("service:db")],
        }
    }
}
