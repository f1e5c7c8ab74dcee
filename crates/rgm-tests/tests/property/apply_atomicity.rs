//! Property tests: a failing step stops the plan where it is.

use proptest::prelude::*;
use rgm_depends::{
    dep_apply_trans, dep_calc_trans, DependsError, DependencyGraph, PlannerConfig, RecordingActuator, ResourceState,
};
use rgm_tests::nodes;
use rgm_types::RgState;

proptest! {
    /// With a failure injected at step k, steps before k are applied,
    /// step k marks its resource FAILED, and nothing after k is invoked.
    #[test]
    fn failure_at_step_k(count in 1usize..8, fail_at in 0usize..8) {
        let fail_at = fail_at % count;
        let graph = DependencyGraph::build(&[]);
        let states: Vec<ResourceState> = (0..count).map(|i| ResourceState::new(format!("svc:{}", i))).collect();
        let plan = dep_calc_trans(&graph, &states, &nodes(&[1]), &PlannerConfig::default());
        prop_assert_eq!(plan.ops.len(), count);

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let actuator = RecordingActuator::new();
            actuator.fail_on(&plan.ops[fail_at].resource);
            let mut applied = states.clone();
            let result = dep_apply_trans(&mut applied, &plan.ops, &actuator).await;

            let failed_at_step = matches!(result, Err(DependsError::StepFailed { step, .. }) if step == fail_at);
            prop_assert!(failed_at_step);
            prop_assert_eq!(actuator.calls().len(), fail_at + 1);

            for (i, op) in plan.ops.iter().enumerate() {
                let s = applied.iter().find(|s| s.name == op.resource).unwrap();
                let expected = match i.cmp(&fail_at) {
                    std::cmp::Ordering::Less => RgState::Started,
                    std::cmp::Ordering::Equal => RgState::Failed,
                    std::cmp::Ordering::Greater => RgState::Stopped,
                };
                prop_assert_eq!(s.state, expected);
            }
            Ok(())
        })?;
    }
}
