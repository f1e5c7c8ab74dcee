//! End to end through the daemon engine: configuration, workers, agents.

use std::sync::Arc;

use rgm_daemon::{ClusterConfig, ClusterContext, DaemonConfig, GroupEngine, MembershipEvent, Reconciler};
use rgm_depends::DependencyConfig;
use rgm_domain::{DomainConfig, DomainFlags, DomainMemberConfig};
use rgm_restree::{
    ChildType, OcfOperation, RecordingExecutor, ResourceConfig, ResourceRule, RuleAttr, TreeEntry,
};
use rgm_thread::{GroupRequest, GroupThreadManager};
use rgm_types::{Member, NodeId, RequestKind, ReturnCode, RgState};

fn cluster(local_online: bool) -> ClusterConfig {
    let service = ResourceRule::new("service")
        .as_root()
        .with_attr(RuleAttr::new("name").primary())
        .with_attr(RuleAttr::new("domain"))
        .with_child(ChildType::new("fs").levels(1, 2))
        .with_child(ChildType::new("script").levels(2, 1));
    let fs = ResourceRule::new("fs")
        .with_agent("fs.sh")
        .with_attr(RuleAttr::new("mountpoint").primary());
    let script = ResourceRule::new("script")
        .with_agent("script.sh")
        .with_attr(RuleAttr::new("name").primary());

    ClusterConfig {
        nodes: vec![
            Member::new(NodeId::new(1), "node1", local_online),
            Member::new(NodeId::new(2), "node2", true),
        ],
        rules: vec![service, fs, script],
        resources: vec![ResourceConfig::new("fs").attr("mountpoint", "/data")],
        tree: vec![
            TreeEntry::inline("service")
                .attr("name", "storage")
                .attr("domain", "ordered")
                .child(TreeEntry::reference("fs", "/data")),
            TreeEntry::inline("service")
                .attr("name", "app")
                .child(TreeEntry::inline("script").attr("name", "app")),
        ],
        domains: vec![DomainConfig {
            name: "ordered".into(),
            flags: DomainFlags {
                ordered: true,
                ..Default::default()
            },
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
        }],
        dependencies: vec![DependencyConfig::new("service:app").requires("service:storage")],
    }
}

fn reconciler(config: &ClusterConfig) -> (Arc<Reconciler>, Arc<RecordingExecutor>) {
    let executor = Arc::new(RecordingExecutor::new());
    let daemon = DaemonConfig::default();
    let engine = GroupEngine::new(ClusterContext::build(config), executor.clone(), &daemon);
    let (r, _events) = Reconciler::new(daemon, GroupThreadManager::new(Arc::new(engine)));
    (r, executor)
}

#[tokio::test]
async fn reconcile_brings_up_stack_in_order() {
    let (r, executor) = reconciler(&cluster(true));
    let report = r.reconcile().await;
    assert_eq!(report.before, 2);
    assert_eq!(report.after, 0);

    assert_eq!(
        executor.operations(),
        vec![
            ("fs:/data".to_string(), OcfOperation::Start),
            ("script:app".to_string(), OcfOperation::Start),
        ]
    );
}

#[tokio::test]
async fn stop_request_takes_dependent_down() {
    let (r, executor) = reconciler(&cluster(true));
    r.reconcile().await;

    let (request, reply) = GroupRequest::new(RequestKind::Stop).with_reply();
    r.submit("service:storage", request).unwrap();
    let outcome = reply.await.unwrap();
    assert_eq!(outcome.code, ReturnCode::Success);

    let stops: Vec<String> = executor
        .operations()
        .into_iter()
        .filter(|(_, op)| *op == OcfOperation::Stop)
        .map(|(r, _)| r)
        .collect();
    assert_eq!(stops, vec!["script:app".to_string(), "fs:/data".to_string()]);
}

#[tokio::test]
async fn dependent_start_is_refused() {
    let (r, executor) = reconciler(&cluster(true));
    let (request, reply) = GroupRequest::new(RequestKind::Start).with_reply();
    r.submit("service:app", request).unwrap();
    assert_eq!(reply.await.unwrap().code, ReturnCode::Depend);
    assert!(executor.calls().is_empty());
}

async fn run_on(r: &Reconciler, node: u32) {
    let mut states = r.engine().states().await;
    for s in states.iter_mut() {
        s.state = RgState::Started;
        s.owner = Some(NodeId::new(node));
    }
    r.engine().import_states(&states).await;
}

#[tokio::test]
async fn groups_on_lost_node_restart_here() {
    let (r, executor) = reconciler(&cluster(true));
    run_on(&r, 2).await;

    r.handle_event(MembershipEvent::NodeDown(NodeId::new(2))).await;
    let states = r.engine().states().await;
    assert!(states
        .iter()
        .all(|s| s.is_running() && s.owner == Some(NodeId::new(1))));
    let starts: Vec<String> = executor
        .operations()
        .into_iter()
        .filter(|(_, op)| *op == OcfOperation::Start)
        .map(|(r, _)| r)
        .collect();
    assert_eq!(starts, vec!["fs:/data".to_string(), "script:app".to_string()]);
}

#[tokio::test]
async fn starts_placed_on_other_node_stay_pending() {
    // Node 1 is down, so this daemon can only place groups on node 2.
    let (r, executor) = reconciler(&cluster(false));
    let report = r.reconcile().await;
    assert!(executor.calls().is_empty());
    assert!(report.after > 0);
    assert!(report.deferred.contains(&"service:storage".to_string()));
    assert!(report.deferred.contains(&"service:app".to_string()));
    assert!(r.engine().states().await.iter().all(|s| !s.is_running()));
}

#[tokio::test]
async fn disable_of_remote_group_is_forwarded() {
    let (r, executor) = reconciler(&cluster(true));
    run_on(&r, 2).await;

    let (request, reply) = GroupRequest::new(RequestKind::Disable).with_reply();
    r.submit("service:app", request).unwrap();
    let outcome = reply.await.unwrap();
    assert_eq!(outcome.code, ReturnCode::Forward);
    assert_eq!(outcome.new_owner, Some(NodeId::new(2)));

    assert!(executor.calls().is_empty());
    let states = r.engine().states().await;
    assert!(states
        .iter()
        .all(|s| s.is_running() && s.owner == Some(NodeId::new(2))));
}
