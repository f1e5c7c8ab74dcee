//! Property tests: `dep_check` is a pure function of its inputs.

use proptest::prelude::*;
use rgm_depends::{dep_check, dep_errors, DependencyConfig, DependencyGraph, ResourceState};
use rgm_tests::nodes;
use rgm_types::{NodeId, RgState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const NAMES: [&str; 5] = ["svc:a", "svc:b", "svc:c", "svc:d", "svc:e"];

fn arb_state() -> impl Strategy<Value = (RgState, Option<u32>)> {
    prop_oneof![
        Just((RgState::Stopped, None)),
        (1u32..=4).prop_map(|n| (RgState::Started, Some(n))),
        Just((RgState::Failed, None)),
        Just((RgState::Disabled, None)),
    ]
}

/// Random requirement edges between the five services.
fn arb_edges() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0usize..5, 0usize..5), 0..6)
}

fn build(edges: &[(usize, usize)]) -> DependencyGraph {
    let configs: Vec<DependencyConfig> = edges
        .iter()
        .filter(|(a, b)| a != b)
        .map(|&(a, b)| DependencyConfig::new(NAMES[a]).requires(NAMES[b]))
        .collect();
    DependencyGraph::build(&configs)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Two checks in a row give the same score and the same error set.
    #[test]
    fn check_twice_is_identical(
        placement in prop::collection::vec(arb_state(), 5),
        edges in arb_edges(),
        online in prop::collection::btree_set(1u32..=4, 0..=4),
    ) {
        let graph = build(&edges);
        let mut states: Vec<ResourceState> = NAMES
            .iter()
            .zip(&placement)
            .map(|(name, (state, owner))| {
                let mut s = ResourceState::new(*name);
                s.state = *state;
                s.owner = owner.map(NodeId::new);
                s
            })
            .collect();
        let online = nodes(&online.into_iter().collect::<Vec<_>>());

        let first = dep_check(&graph, &mut states, &online);
        let first_errors = dep_errors(&states);
        let second = dep_check(&graph, &mut states, &online);

        prop_assert_eq!(first, second);
        prop_assert_eq!(first_errors, dep_errors(&states));
    }

    /// The score is negative exactly when errors are reported.
    #[test]
    fn negative_score_matches_errors(
        placement in prop::collection::vec(arb_state(), 5),
        edges in arb_edges(),
    ) {
        let graph = build(&edges);
        let mut states: Vec<ResourceState> = NAMES
            .iter()
            .zip(&placement)
            .map(|(name, (state, owner))| {
                let mut s = ResourceState::new(*name);
                s.state = *state;
                s.owner = owner.map(NodeId::new);
                s
            })
            .collect();
        let online = nodes(&[1, 2]);

        let score = dep_check(&graph, &mut states, &online);
        let errors = dep_errors(&states);
        prop_assert_eq!(score < 0, !errors.is_empty());
    }
}
