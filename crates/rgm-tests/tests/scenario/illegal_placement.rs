//! A resource reported running on a node that is not in the online set.

use rgm_depends::{dep_calc_trans, dep_check, dep_errors, DepError, PlanOp, PlannerConfig};
use rgm_tests::{app_graph, app_states, nodes};
use rgm_types::{NodeId, RgState};

#[test]
fn dead_owner_is_exactly_one_error() {
    let graph = app_graph();
    let mut states = app_states();
    let fs = states.iter().position(|s| s.name == "fs:/data").unwrap();
    states[fs].state = RgState::Started;
    states[fs].owner = Some(NodeId::new(3));
    let online = nodes(&[1, 2]);

    assert_eq!(dep_check(&graph, &mut states, &online), -1);
    assert!(states[fs].flags.dead_node);

    let errors = dep_errors(&states);
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        DepError::DeadNode { resource, node } => {
            assert_eq!(resource, "fs:/data");
            assert_eq!(*node, Some(NodeId::new(3)));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn correction_comes_first() {
    let graph = app_graph();
    let mut states = app_states();
    states[1].state = RgState::Started;
    states[1].owner = Some(NodeId::new(3));

    let plan = dep_calc_trans(&graph, &states, &nodes(&[1, 2]), &PlannerConfig::default());
    assert_eq!(plan.ops[0], PlanOp::stop("fs:/data", 0));
    assert_eq!(plan.score, 0);
}

#[test]
fn check_is_repeatable_after_marks() {
    let graph = app_graph();
    let mut states = app_states();
    states[2].state = RgState::Started;
    states[2].owner = Some(NodeId::new(1));
    let online = nodes(&[1, 2]);

    let first = dep_check(&graph, &mut states, &online);
    let errors = dep_errors(&states);
    assert_eq!(first, -1);
    assert_eq!(dep_check(&graph, &mut states, &online), first);
    assert_eq!(dep_errors(&states), errors);
}
