//! Property tests: failover domain eligibility.

use proptest::prelude::*;
use rgm_domain::{DomainFlags, FodRank};
use rgm_tests::{membership, two_node_domain};
use rgm_types::NodeId;

const SERVICE: &str = "service:web";

fn arb_flags() -> impl Strategy<Value = DomainFlags> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(ordered, restricted, nofailback)| DomainFlags {
        ordered,
        restricted,
        nofailback,
    })
}

/// Online subset of a five node cluster.
fn arb_online() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::btree_set(1u32..=5, 0..=5).prop_map(|s| s.into_iter().collect())
}

proptest! {
    /// Ordered domain {node1: 1, node2: 2}: node1 is BEST, node2 BETTER,
    /// and node2 becomes BEST once node1 is gone.
    #[test]
    fn ordered_priorities(extra in arb_online(), restricted in any::<bool>()) {
        let flags = DomainFlags { ordered: true, restricted, nofailback: false };
        let mut online = extra.clone();
        online.extend([1, 2]);
        let m = membership(5, &online);
        let domains = two_node_domain(flags, &m, SERVICE);

        prop_assert_eq!(domains.node_should_start(NodeId::new(1), &m, SERVICE, None), FodRank::Best);
        prop_assert_eq!(domains.node_should_start(NodeId::new(2), &m, SERVICE, None), FodRank::Better);

        let without_one: Vec<u32> = online.into_iter().filter(|&n| n != 1).collect();
        let m = membership(5, &without_one);
        prop_assert_eq!(domains.node_should_start(NodeId::new(2), &m, SERVICE, None), FodRank::Best);
    }

    /// Restricted domains never admit outsiders, whoever is online.
    #[test]
    fn restricted_excludes_outsiders(
        flags in arb_flags(),
        online in arb_online(),
        outsider in 3u32..=5,
        owner in prop::option::of(1u32..=5),
    ) {
        let flags = DomainFlags { restricted: true, ..flags };
        let m = membership(5, &online);
        let domains = two_node_domain(flags, &m, SERVICE);
        let rank = domains.node_should_start(NodeId::new(outsider), &m, SERVICE, owner.map(NodeId::new));
        prop_assert_eq!(rank, FodRank::Illegal);
    }

    /// Offline nodes are always illegal.
    #[test]
    fn offline_is_illegal(flags in arb_flags(), online in arb_online(), node in 1u32..=5) {
        prop_assume!(!online.contains(&node));
        let m = membership(5, &online);
        let domains = two_node_domain(flags, &m, SERVICE);
        prop_assert_eq!(domains.node_should_start(NodeId::new(node), &m, SERVICE, None), FodRank::Illegal);
    }

    /// No-failback: a legitimate owner on node2 stays BEST while node1 is
    /// only BETTER.
    #[test]
    fn nofailback_keeps_owner(restricted in any::<bool>(), extra in arb_online()) {
        let flags = DomainFlags { ordered: true, restricted, nofailback: true };
        let mut online = extra;
        online.extend([1, 2]);
        let m = membership(5, &online);
        let domains = two_node_domain(flags, &m, SERVICE);
        let owner = Some(NodeId::new(2));

        prop_assert_eq!(domains.node_should_start(NodeId::new(1), &m, SERVICE, owner), FodRank::Better);
        prop_assert_eq!(domains.node_should_start(NodeId::new(2), &m, SERVICE, owner), FodRank::Best);
    }
}
