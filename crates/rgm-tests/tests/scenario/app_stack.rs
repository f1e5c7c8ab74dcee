//! Three resources on two nodes: an address, a filesystem and an
//! application script that needs the filesystem.

use rgm_depends::{dep_apply_trans, dep_calc_trans, dep_check, PlannerConfig, RecordingActuator};
use rgm_tests::{app_graph, app_states, nodes, step_of};

#[tokio::test]
async fn all_stopped_reaches_ideal() {
    let graph = app_graph();
    let mut states = app_states();
    let online = nodes(&[1, 2]);

    assert_eq!(dep_check(&graph, &mut states, &online), 3);

    let plan = dep_calc_trans(&graph, &states, &online, &PlannerConfig::default());
    assert_eq!(plan.score, 0);
    assert_eq!(plan.ops.len(), 3);
    assert!(plan.ops.iter().all(|o| o.is_start()));

    let fs = step_of(&plan.ops, "fs:/data").unwrap();
    let app = step_of(&plan.ops, "script:app").unwrap();
    assert!(fs < app);
    assert!(step_of(&plan.ops, "ip:10.0.0.1").is_some());

    let actuator = RecordingActuator::new();
    let applied = dep_apply_trans(&mut states, &plan.ops, &actuator).await.unwrap();
    assert_eq!(applied, 3);
    assert_eq!(actuator.calls().len(), 3);

    assert_eq!(dep_check(&graph, &mut states, &online), 0);
    assert!(states.iter().all(|s| s.is_running()));
}

#[tokio::test]
async fn failed_requirement_leaves_dependent_stopped() {
    let graph = app_graph();
    let mut states = app_states();
    let online = nodes(&[1, 2]);
    let plan = dep_calc_trans(&graph, &states, &online, &PlannerConfig::default());

    let actuator = RecordingActuator::new();
    actuator.fail_on("fs:/data");
    let err = dep_apply_trans(&mut states, &plan.ops, &actuator).await.unwrap_err();
    assert!(err.to_string().contains("fs:/data"));

    let app = states.iter().find(|s| s.name == "script:app").unwrap();
    assert!(!app.is_running());
    assert!(!actuator.calls().iter().any(|c| c.contains("script:app")));

    // The failure resurfaces on the next pass.
    assert!(dep_check(&graph, &mut states, &online) < 0);
}
