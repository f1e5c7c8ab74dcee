//! Failover domain definitions and the membership classification of a node.

use rgm_types::{Membership, NodeId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Highest priority value accepted; anything outside 1..=100 is unprioritized.
pub const MAX_PRIORITY: u32 = 100;

/// Policy flags of a failover domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFlags {
    #[serde(default)]
    pub ordered: bool,
    #[serde(default)]
    pub restricted: bool,
    #[serde(default)]
    pub nofailback: bool,
}

/// Configured member entry, as read from the cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMemberConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i64,
}

/// Configured failover domain, as read from the cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    #[serde(flatten)]
    pub flags: DomainFlags,
    #[serde(default)]
    pub nodes: Vec<DomainMemberConfig>,
}

/// A resolved domain member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMember {
    pub name: String,
    pub id: NodeId,
    /// 1..=100, or 0 when unprioritized.
    pub priority: u32,
}

/// A failover domain with resolved member node ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverDomain {
    pub name: String,
    pub flags: DomainFlags,
    pub members: Vec<DomainMember>,
}

/// Classification of a node relative to the online members of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DomainClass {
    /// No member of the domain is online.
    NoMemberOnline,
    /// A member is online, but the node is not one of them.
    NotMember,
    /// Online member, but not among the most preferred online members.
    Member,
    /// Online member with the lowest online priority value.
    Preferred,
}

impl DomainClass {
    pub fn code(self) -> u8 {
        match self {
            DomainClass::NoMemberOnline => 0,
            DomainClass::NotMember => 1,
            DomainClass::Member => 2,
            DomainClass::Preferred => 3,
        }
    }
}

pub(crate) fn normalize_priority(raw: i64) -> u32 {
    if raw <= 0 || raw > MAX_PRIORITY as i64 {
        0
    } else {
        raw as u32
    }
}

impl FailoverDomain {
    pub fn new(name: impl Into<String>, flags: DomainFlags) -> Self {
        Self {
            name: name.into(),
            flags,
            members: Vec::new(),
        }
    }

    /// Add a member, returning false when the node is already listed.
    pub fn add_member(&mut self, name: impl Into<String>, id: NodeId, priority: i64) -> bool {
        let name = name.into();
        if self
            .members
            .iter()
            .any(|m| m.id == id || m.name.eq_ignore_ascii_case(&name))
        {
            return false;
        }
        self.members.push(DomainMember {
            name,
            id,
            priority: normalize_priority(priority),
        });
        true
    }

    /// Resolve a configured domain against the configured node set.
    ///
    /// Unknown and duplicate members are logged and skipped.
    pub fn from_config(config: &DomainConfig, membership: &Membership) -> Self {
        let mut domain = Self::new(config.name.clone(), config.flags);

        for entry in &config.nodes {
            let Some(node) = membership.find_by_name(&entry.name) else {
                warn!(domain = %config.name, node = %entry.name, "Domain member is not a cluster node; skipping");
                continue;
            };
            if !domain.add_member(node.name.clone(), node.id, entry.priority) {
                warn!(domain = %config.name, node = %entry.name, "Node defined multiple times in domain; skipping");
            }
        }

        domain
    }

    pub fn is_member(&self, id: NodeId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn member(&self, id: NodeId) -> Option<&DomainMember> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Members in placement order: by priority for ordered domains,
    /// declaration order otherwise.
    pub fn members_by_priority(&self) -> Vec<&DomainMember> {
        let mut members: Vec<&DomainMember> = self.members.iter().collect();
        if self.flags.ordered {
            members.sort_by_key(|m| m.priority);
        }
        members
    }
}

/// Classify `node_name` against the online members of `domain`.
///
/// Members with equal priority are all equally preferred; declaration order
/// is not a tiebreak.
pub fn node_in_domain(node_name: &str, domain: &FailoverDomain, membership: &Membership) -> DomainClass {
    let mut member_online = false;
    let mut my_priority = None;
    let mut preferred = u32::MAX;

    for member in &domain.members {
        if !membership.is_online(member.id) {
            continue;
        }
        member_online = true;
        if member.name.eq_ignore_ascii_case(node_name) {
            my_priority = Some(member.priority);
        }
        preferred = preferred.min(member.priority);
    }

    if !member_online {
        return DomainClass::NoMemberOnline;
    }

    match my_priority {
        None => DomainClass::NotMember,
        Some(prio) if prio <= preferred => DomainClass::Preferred,
        Some(_) => DomainClass::Member,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgm_types::Member;

    fn membership(online: &[u32]) -> Membership {
        Membership::new(
            (1..=3)
                .map(|id| Member::new(id, format!("node{}", id), online.contains(&id)))
                .collect(),
        )
    }

    fn ordered_domain() -> FailoverDomain {
        let mut d = FailoverDomain::new(
            "web",
            DomainFlags {
                ordered: true,
                ..Default::default()
            },
        );
        d.add_member("node1", NodeId(1), 1);
        d.add_member("node2", NodeId(2), 2);
        d
    }

    #[test]
    fn test_priority_normalization() {
        assert_eq!(normalize_priority(0), 0);
        assert_eq!(normalize_priority(-4), 0);
        assert_eq!(normalize_priority(101), 0);
        assert_eq!(normalize_priority(100), 100);
        assert_eq!(normalize_priority(1), 1);
    }

    #[test]
    fn test_classification() {
        let d = ordered_domain();
        let all = membership(&[1, 2, 3]);

        assert_eq!(node_in_domain("node1", &d, &all), DomainClass::Preferred);
        assert_eq!(node_in_domain("node2", &d, &all), DomainClass::Member);
        assert_eq!(node_in_domain("node3", &d, &all), DomainClass::NotMember);

        let only_two = membership(&[2, 3]);
        assert_eq!(node_in_domain("node2", &d, &only_two), DomainClass::Preferred);

        let only_three = membership(&[3]);
        assert_eq!(node_in_domain("node3", &d, &only_three), DomainClass::NoMemberOnline);
    }

    #[test]
    fn test_equal_priorities_are_all_preferred() {
        let mut d = FailoverDomain::new("pair", DomainFlags::default());
        d.add_member("node1", NodeId(1), 5);
        d.add_member("node2", NodeId(2), 5);
        let all = membership(&[1, 2]);
        assert_eq!(node_in_domain("node1", &d, &all), DomainClass::Preferred);
        assert_eq!(node_in_domain("node2", &d, &all), DomainClass::Preferred);
    }

    #[test]
    fn test_from_config_skips_bad_members() {
        let cfg = DomainConfig {
            name: "db".into(),
            flags: DomainFlags::default(),
            nodes: vec![
                DomainMemberConfig { name: "node1".into(), priority: 1 },
                DomainMemberConfig { name: "NODE1".into(), priority: 2 },
                DomainMemberConfig { name: "node7".into(), priority: 1 },
            ],
        };
        let d = FailoverDomain::from_config(&cfg, &membership(&[1]));
        assert_eq!(d.members.len(), 1);
        assert_eq!(d.members[0].priority, 1);
    }

    #[test]
    fn test_members_by_priority() {
        let mut d = FailoverDomain::new(
            "ord",
            DomainFlags {
                ordered: true,
                ..Default::default()
            },
        );
        d.add_member("node3", NodeId(3), 3);
        d.add_member("node1", NodeId(1), 1);
        let order: Vec<NodeId> = d.members_by_priority().iter().map(|m| m.id).collect();
        assert_eq!(order, vec![NodeId(1), NodeId(3)]);
    }

    #[test]
    fn test_config_flags_flatten() {
        let cfg: DomainConfig = serde_json::from_str(
            r#"{"name":"x","ordered":true,"restricted":true,"nodes":[{"name":"node1","priority":1}]}"#,
        )
        .unwrap();
        assert!(cfg.flags.ordered && cfg.flags.restricted && !cfg.flags.nofailback);
    }
}
