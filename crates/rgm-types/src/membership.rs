//! Cluster membership snapshot.
//!
//! A [`Membership`] is taken once per evaluation pass and never mutated by
//! the evaluator. Node order is the order reported by the membership
//! provider.

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// One configured cluster node and its liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub online: bool,
}

impl Member {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, online: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            online,
        }
    }
}

/// Ordered set of configured nodes with their online flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    members: Vec<Member>,
}

impl Membership {
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }

    /// Build a snapshot where every listed node is online.
    pub fn all_online<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        Self {
            members: nodes
                .into_iter()
                .map(|(id, name)| Member::new(id, name, true))
                .collect(),
        }
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All configured node ids, online or not.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// Ids of online nodes, in membership order.
    pub fn online_ids(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|m| m.online)
            .map(|m| m.id)
            .collect()
    }

    pub fn is_online(&self, id: NodeId) -> bool {
        self.members.iter().any(|m| m.id == id && m.online)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Case-insensitive lookup by node name.
    pub fn find_by_name(&self, name: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        self.get(id).map(|m| m.name.as_str())
    }

    /// Return a copy with the online flags replaced by `online`.
    ///
    /// Ids in `online` that are not configured are ignored.
    pub fn with_online(&self, online: &[NodeId]) -> Self {
        Self {
            members: self
                .members
                .iter()
                .map(|m| Member {
                    online: online.contains(&m.id),
                    ..m.clone()
                })
                .collect(),
        }
    }

    /// Mark one node online or offline. Returns false if the node is unknown.
    pub fn set_online(&mut self, id: NodeId, online: bool) -> bool {
        match self.members.iter_mut().find(|m| m.id == id) {
            Some(member) => {
                member.online = online;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_nodes() -> Membership {
        Membership::new(vec![
            Member::new(1, "node1", true),
            Member::new(2, "node2", false),
            Member::new(3, "node3", true),
        ])
    }

    #[test]
    fn test_online_ids_keep_order() {
        let m = three_nodes();
        assert_eq!(m.online_ids(), vec![NodeId(1), NodeId(3)]);
        assert_eq!(m.node_ids().len(), 3);
    }

    #[test]
    fn test_find_by_name_ignores_case() {
        let m = three_nodes();
        assert_eq!(m.find_by_name("NODE2").map(|n| n.id), Some(NodeId(2)));
        assert!(m.find_by_name("node9").is_none());
    }

    #[test]
    fn test_with_online() {
        let m = three_nodes().with_online(&[NodeId(2)]);
        assert!(m.is_online(NodeId(2)));
        assert!(!m.is_online(NodeId(1)));
        assert!(m.contains(NodeId(1)));
    }

    #[test]
    fn test_set_online_unknown_node() {
        let mut m = three_nodes();
        assert!(!m.set_online(NodeId(9), true));
        assert!(m.set_online(NodeId(2), true));
        assert_eq!(m.online_ids().len(), 3);
    }
}
