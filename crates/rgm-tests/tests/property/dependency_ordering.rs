//! Property tests: plans start requirements before their dependents.

use proptest::prelude::*;
use rgm_depends::{dep_calc_trans, DependencyConfig, DependencyGraph, PlannerConfig, ResourceState};
use rgm_tests::{nodes, step_of};

proptest! {
    /// For a chain of services where each requires the next, every start
    /// comes after the start of what it requires.
    #[test]
    fn chain_starts_bottom_up(len in 2usize..7, online in 1u32..=3, rotate in 0usize..7) {
        let names: Vec<String> = (0..len).map(|i| format!("svc:{}", i)).collect();
        let configs: Vec<DependencyConfig> = names
            .windows(2)
            .map(|w| DependencyConfig::new(w[0].clone()).requires(w[1].clone()))
            .collect();
        let graph = DependencyGraph::build(&configs);

        // Declaration order of states must not matter.
        let mut states: Vec<ResourceState> = names.iter().map(ResourceState::new).collect();
        states.rotate_left(rotate % len);

        let online: Vec<u32> = (1..=online).collect();
        let plan = dep_calc_trans(&graph, &states, &nodes(&online), &PlannerConfig::default());

        prop_assert_eq!(plan.score, 0);
        prop_assert_eq!(plan.ops.len(), len);
        for w in names.windows(2) {
            let dependent = step_of(&plan.ops, &w[0]).unwrap();
            let required = step_of(&plan.ops, &w[1]).unwrap();
            prop_assert!(required < dependent);
        }
    }

    /// Two-resource case from all stopped to all started.
    #[test]
    fn pair_orders_requirement_first(swap in any::<bool>()) {
        let graph = DependencyGraph::build(&[DependencyConfig::new("svc:a").requires("svc:b")]);
        let mut states = vec![ResourceState::new("svc:a"), ResourceState::new("svc:b")];
        if swap {
            states.swap(0, 1);
        }
        let plan = dep_calc_trans(&graph, &states, &nodes(&[1, 2]), &PlannerConfig::default());
        prop_assert!(step_of(&plan.ops, "svc:b").unwrap() < step_of(&plan.ops, "svc:a").unwrap());
    }
}
