//! Request handling against the live cluster state.
//!
//! [`GroupEngine`] is the [`GroupHandler`] behind every group worker. It
//! owns the resource state table and the current [`ClusterContext`]
//! snapshot.
//!
//! The state table is locked only to plan and to commit single plan
//! steps. Agents run under the owning group's tree lock alone, so one
//! group's start or stop never waits on another group's agents.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex as SyncMutex, RwLock};
use rgm_depends::{
    commit_step, dep_calc_trans, dep_check, dep_check_operation, dep_print_errors, find_state, run_step, DependsError,
    DependsResult, PlanKind, PlanOp, PlannerConfig, ResourceActuator, ResourceState, StepOutcome,
};
use rgm_restree::{
    res_condstart, res_condstop, res_start, res_status, res_stop, AgentExecutor, AgentSettings, NodeState,
    ResourceTree, StatusReport,
};
use rgm_thread::{GroupHandler, GroupRequest, RequestOutcome};
use rgm_types::{Membership, NodeId, RequestKind, ReturnCode, RgState};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cluster::{ClusterConfig, ClusterContext};
use crate::config::DaemonConfig;

/// Runs evaluator plan steps through the group resource trees.
///
/// Only starts placed on the local node run agents here. Starts placed on
/// another node come back as [`StepOutcome::Delegated`] and are left for
/// that node's daemon.
pub struct TreeActuator {
    context: Arc<ClusterContext>,
    executor: Arc<dyn AgentExecutor>,
    settings: AgentSettings,
    local: NodeId,
}

impl TreeActuator {
    pub fn new(context: Arc<ClusterContext>, executor: Arc<dyn AgentExecutor>, settings: AgentSettings, local: NodeId) -> Self {
        Self {
            context,
            executor,
            settings,
            local,
        }
    }

    fn tree(&self, resource: &str) -> DependsResult<&Mutex<ResourceTree>> {
        self.context
            .group_tree(resource)
            .ok_or_else(|| DependsError::state_not_found(resource))
    }
}

fn actuator_error(resource: &str, e: impl ToString) -> DependsError {
    DependsError::Actuator {
        resource: resource.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl ResourceActuator for TreeActuator {
    async fn start(&self, resource: &str, node: NodeId) -> DependsResult<StepOutcome> {
        if node != self.local {
            info!(resource, node = %node, "Start placed on remote node");
            return Ok(StepOutcome::Delegated);
        }
        let mut tree = self.tree(resource)?.lock().await;
        res_start(&mut tree, None, self.executor.as_ref(), &self.settings)
            .await
            .map(|()| StepOutcome::Done)
            .map_err(|e| actuator_error(resource, e))
    }

    async fn stop(&self, resource: &str) -> DependsResult<StepOutcome> {
        let mut tree = self.tree(resource)?.lock().await;
        if tree.nodes().all(|(_, n)| n.state == NodeState::Stopped) {
            debug!(resource, "Not running locally; nothing to stop");
            return Ok(StepOutcome::Done);
        }
        res_stop(&mut tree, None, self.executor.as_ref(), &self.settings)
            .await
            .map(|()| StepOutcome::Done)
            .map_err(|e| actuator_error(resource, e))
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// `dep_check` score before the pass.
    pub before: i32,
    /// `dep_check` score after the pass.
    pub after: i32,
    /// Plan steps carried out.
    pub applied: usize,
    /// Errors reported by the initial check.
    pub errors: Vec<String>,
    /// Steps left to other nodes, or held back behind one.
    pub deferred: Vec<String>,
}

/// Result of carrying out a plan step by step.
#[derive(Debug, Default)]
struct Execution {
    applied: usize,
    /// Resources whose step belongs to another node.
    delegated: Vec<String>,
    /// Resources whose step was skipped: another request moved them after
    /// planning, or they depend on a delegated step.
    held: Vec<String>,
    /// Failed step that ended the run.
    failure: Option<DependsError>,
}

impl Execution {
    fn deferred(&self, resource: &str) -> bool {
        self.delegated
            .iter()
            .chain(self.held.iter())
            .any(|r| r.eq_ignore_ascii_case(resource))
    }
}

enum Precheck {
    Run,
    Delegate(NodeId),
    Hold,
}

fn code_for(e: &DependsError) -> ReturnCode {
    match e {
        DependsError::NotFound(_) => ReturnCode::NoService,
        DependsError::Refused { .. } => ReturnCode::Depend,
        DependsError::Unsupported(_) => ReturnCode::Invalid,
        DependsError::Actuator { .. } | DependsError::StepFailed { .. } => ReturnCode::Fail,
    }
}

pub struct GroupEngine {
    context: RwLock<Arc<ClusterContext>>,
    membership: RwLock<Membership>,
    states: Mutex<Vec<ResourceState>>,
    frozen: SyncMutex<HashSet<String>>,
    /// Trees replaced by a reconfigure, kept until their conditional stop.
    retired: SyncMutex<HashMap<String, ResourceTree>>,
    executor: Arc<dyn AgentExecutor>,
    settings: AgentSettings,
    planner: PlannerConfig,
    local: NodeId,
}

impl GroupEngine {
    pub fn new(context: ClusterContext, executor: Arc<dyn AgentExecutor>, config: &DaemonConfig) -> Self {
        let membership = context.membership.clone();
        let states = context.allocate_states(&membership);
        Self {
            context: RwLock::new(Arc::new(context)),
            membership: RwLock::new(membership),
            states: Mutex::new(states),
            frozen: SyncMutex::new(HashSet::new()),
            retired: SyncMutex::new(HashMap::new()),
            executor,
            settings: config.agents.clone(),
            planner: config.planner.clone(),
            local: NodeId::new(config.node.id),
        }
    }

    pub fn context(&self) -> Arc<ClusterContext> {
        self.context.read().clone()
    }

    pub fn membership(&self) -> Membership {
        self.membership.read().clone()
    }

    pub fn local_node(&self) -> NodeId {
        self.local
    }

    /// Record a membership transition. Returns false for unknown nodes.
    pub fn set_online(&self, node: NodeId, online: bool) -> bool {
        self.membership.write().set_online(node, online)
    }

    pub async fn states(&self) -> Vec<ResourceState> {
        self.states.lock().await.clone()
    }

    /// Overwrite state, owner and last owner of the named resources.
    pub async fn import_states(&self, imported: &[ResourceState]) {
        let mut states = self.states.lock().await;
        for s in imported {
            match find_state(&states, &s.name) {
                Some(i) => {
                    states[i].state = s.state;
                    states[i].owner = s.owner;
                    states[i].last_owner = s.last_owner;
                }
                None => warn!(resource = %s.name, "Ignoring state for unknown resource"),
            }
        }
    }

    pub fn is_frozen(&self, group: &str) -> bool {
        self.frozen.lock().contains(&group.to_ascii_lowercase())
    }

    /// Groups the state table shows running on this node.
    pub async fn local_groups(&self) -> Vec<String> {
        self.states
            .lock()
            .await
            .iter()
            .filter(|s| s.is_running() && s.owner == Some(self.local))
            .map(|s| s.name.clone())
            .collect()
    }

    fn actuator(&self, context: Arc<ClusterContext>) -> TreeActuator {
        TreeActuator::new(context, self.executor.clone(), self.settings.clone(), self.local)
    }

    /// Another online node running `state`, if any.
    fn remote_owner(&self, state: &ResourceState, online: &[NodeId]) -> Option<NodeId> {
        state
            .owner
            .filter(|o| state.is_running() && *o != self.local && online.contains(o))
    }

    /// Validate a user operation, then carry out the resulting plan.
    ///
    /// Stop-class requests for a group running on another online node are
    /// answered with `Forward`; the owner has to run the agents.
    async fn run_operation(&self, group: &str, kind: RequestKind, target: Option<NodeId>) -> RequestOutcome {
        let ctx = self.context();
        if !ctx.has_group(group) {
            return RequestOutcome::from_code(ReturnCode::NoService);
        }
        let online = self.membership.read().online_ids();
        let op = match kind {
            RequestKind::StartRemote | RequestKind::StartRecover => RequestKind::Start,
            other => other,
        };

        let (ops, planned) = {
            let states = self.states.lock().await;
            let Some(idx) = find_state(&states, group) else {
                return RequestOutcome::from_code(ReturnCode::NoService);
            };
            let stopping = matches!(
                op,
                RequestKind::Stop | RequestKind::StopUser | RequestKind::Disable | RequestKind::Relocate
            );
            if let Some(owner) = self.remote_owner(&states[idx], &online).filter(|_| stopping) {
                info!(group, request = %kind, owner = %owner, "Group runs on another node; forwarding");
                return RequestOutcome::from_code(ReturnCode::Forward).with_owner(owner);
            }

            let target = target.or_else(|| {
                let starting = matches!(op, RequestKind::Start | RequestKind::Enable);
                let local_ok = states[idx].candidates(&online).contains(&self.local);
                (starting && local_ok).then_some(self.local)
            });

            match dep_check_operation(group, op, target, &ctx.graph, &states, &online, &self.planner) {
                Ok(ops) => (ops, states.clone()),
                Err(e) => {
                    info!(group, request = %kind, error = %e, "Operation refused");
                    return RequestOutcome::from_code(code_for(&e));
                }
            }
        };

        let execution = self.execute(&ctx, planned, &ops, &online).await;
        if let Some(e) = &execution.failure {
            warn!(group, request = %kind, error = %e, "Operation failed");
            return RequestOutcome::from_code(code_for(e));
        }

        if execution.held.iter().any(|r| r.eq_ignore_ascii_case(group)) {
            info!(group, request = %kind, "Group moved while the operation was planned");
            return RequestOutcome::from_code(ReturnCode::Again);
        }
        if let Some(PlanKind::Start { node }) = ops
            .iter()
            .rev()
            .find(|o| o.resource.eq_ignore_ascii_case(group))
            .map(|o| o.kind)
            .filter(|_| execution.delegated.iter().any(|r| r.eq_ignore_ascii_case(group)))
        {
            return RequestOutcome::from_code(ReturnCode::Forward).with_owner(node);
        }

        let states = self.states.lock().await;
        let owner = find_state(&states, group).and_then(|i| states[i].owner);
        match owner {
            Some(node) => RequestOutcome::success().with_owner(node),
            None => RequestOutcome::success(),
        }
    }

    /// Carry out `ops` one step at a time against `planned`, the state
    /// table the plan was computed from.
    ///
    /// Each step is checked and committed under the state lock; agents run
    /// with it released. A step is held back when its resource changed
    /// since planning, or when it is or requires a resource whose step was
    /// deferred. Stops of resources running on another online node are
    /// delegated without touching the local tree.
    async fn execute(
        &self,
        ctx: &Arc<ClusterContext>,
        planned: Vec<ResourceState>,
        ops: &[PlanOp],
        online: &[NodeId],
    ) -> Execution {
        let actuator = self.actuator(ctx.clone());
        let mut expected = planned;
        let mut execution = Execution::default();

        for (step, op) in ops.iter().enumerate() {
            let waiting = execution
                .delegated
                .iter()
                .chain(execution.held.iter())
                .any(|r| ctx.graph.requires(&op.resource, r));
            let check = if waiting || execution.deferred(&op.resource) {
                Precheck::Hold
            } else {
                let states = self.states.lock().await;
                self.precheck(&states, &expected, op, online)
            };

            let result = match check {
                Precheck::Hold => {
                    debug!(step, resource = %op.resource, "Holding plan step");
                    execution.held.push(op.resource.clone());
                    continue;
                }
                Precheck::Delegate(owner) => {
                    info!(step, resource = %op.resource, owner = %owner, "Stop belongs to owning node");
                    Ok(StepOutcome::Delegated)
                }
                Precheck::Run => run_step(op, &actuator).await,
            };

            let mut states = self.states.lock().await;
            let outcome = match commit_step(&mut states, step, op, result) {
                Ok(outcome) => outcome,
                Err(e) => {
                    execution.failure = Some(e);
                    break;
                }
            };
            if let (Some(i), Some(j)) = (find_state(&states, &op.resource), find_state(&expected, &op.resource)) {
                expected[j] = states[i].clone();
            }
            match outcome {
                StepOutcome::Done => execution.applied += 1,
                StepOutcome::Delegated => execution.delegated.push(op.resource.clone()),
            }
        }

        execution
    }

    fn precheck(&self, current: &[ResourceState], expected: &[ResourceState], op: &PlanOp, online: &[NodeId]) -> Precheck {
        let (Some(i), Some(j)) = (find_state(current, &op.resource), find_state(expected, &op.resource)) else {
            return Precheck::Run;
        };
        let (now, then) = (&current[i], &expected[j]);
        if now.state != then.state || now.owner != then.owner {
            return Precheck::Hold;
        }
        match (op.kind, self.remote_owner(now, online)) {
            (PlanKind::Stop | PlanKind::Disable, Some(owner)) => Precheck::Delegate(owner),
            _ => Precheck::Run,
        }
    }

    async fn check_status(&self, group: &str) -> RequestOutcome {
        let ctx = self.context();
        let Some(tree) = ctx.group_tree(group) else {
            return RequestOutcome::from_code(ReturnCode::NoService);
        };
        let running_here = {
            let states = self.states.lock().await;
            find_state(&states, group)
                .map(|i| states[i].is_running() && states[i].owner == Some(self.local))
                .unwrap_or(false)
        };
        if !running_here {
            return RequestOutcome::success();
        }

        let healthy = {
            let mut tree = tree.lock().await;
            match res_status(&mut tree, None, 0, self.executor.as_ref(), &self.settings).await {
                Ok(StatusReport::Healthy) => true,
                Ok(StatusReport::Recoverable(failed)) => {
                    info!(group, resources = ?failed, "Restarting failed independent subtrees");
                    let restarted = async {
                        res_condstop(&mut tree, None, self.executor.as_ref(), &self.settings).await?;
                        res_condstart(&mut tree, None, self.executor.as_ref(), &self.settings).await
                    };
                    restarted.await.is_ok()
                }
                Err(e) => {
                    warn!(group, error = %e, "Status check failed");
                    false
                }
            }
        };

        if healthy {
            RequestOutcome::success()
        } else {
            self.recover(group).await
        }
    }

    /// Stop a failed group and start it again on this node if allowed.
    async fn recover(&self, group: &str) -> RequestOutcome {
        let ctx = self.context();
        let Some(tree) = ctx.group_tree(group) else {
            return RequestOutcome::from_code(ReturnCode::NoService);
        };
        self.set_group_state(group, RgState::Recovering).await;

        let stopped = {
            let mut tree = tree.lock().await;
            res_stop(&mut tree, None, self.executor.as_ref(), &self.settings).await
        };
        if let Err(e) = stopped {
            warn!(group, error = %e, "Recovery stop failed");
            self.set_group_state(group, RgState::Failed).await;
            return RequestOutcome::from_code(ReturnCode::Fail);
        }

        {
            let mut states = self.states.lock().await;
            if let Some(i) = find_state(&states, group) {
                states[i].state = RgState::Stopped;
                states[i].owner = None;
                states[i].last_owner = None;
            }
        }
        info!(group, "Recovering resource group");
        self.run_operation(group, RequestKind::StartRecover, None).await
    }

    async fn set_group_state(&self, group: &str, state: RgState) {
        let mut states = self.states.lock().await;
        if let Some(i) = find_state(&states, group) {
            states[i].state = state;
        }
    }

    /// Emergency stop: agents run, the shared state is left alone.
    async fn init_stop(&self, group: &str) -> RequestOutcome {
        let ctx = self.context();
        let Some(tree) = ctx.group_tree(group) else {
            return RequestOutcome::from_code(ReturnCode::NoService);
        };
        let mut tree = tree.lock().await;
        match res_stop(&mut tree, None, self.executor.as_ref(), &self.settings).await {
            Ok(()) => RequestOutcome::success(),
            Err(e) => {
                warn!(group, error = %e, "Initial stop failed");
                RequestOutcome::from_code(ReturnCode::Fail)
            }
        }
    }

    async fn conditional(&self, group: &str, kind: RequestKind) -> RequestOutcome {
        let result = if kind == RequestKind::CondStop {
            let retired = self.retired.lock().remove(&group.to_ascii_lowercase());
            match retired {
                Some(mut old) => res_condstop(&mut old, None, self.executor.as_ref(), &self.settings).await,
                None => Ok(()),
            }
        } else {
            let ctx = self.context();
            let Some(tree) = ctx.group_tree(group) else {
                return RequestOutcome::from_code(ReturnCode::NoService);
            };
            let mut tree = tree.lock().await;
            res_condstart(&mut tree, None, self.executor.as_ref(), &self.settings).await
        };
        match result {
            Ok(()) => RequestOutcome::success(),
            Err(e) => {
                warn!(group, request = %kind, error = %e, "Conditional operation failed");
                RequestOutcome::from_code(ReturnCode::Fail)
            }
        }
    }

    /// One evaluation pass over the whole cluster: check, plan, apply.
    /// Frozen groups are left where they are.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> ReconcileReport {
        let ctx = self.context();
        let online = self.membership.read().online_ids();

        let (mut report, ops, planned) = {
            let mut states = self.states.lock().await;
            let before = dep_check(&ctx.graph, &mut states, &online);
            let mut report = ReconcileReport {
                before,
                after: before,
                ..Default::default()
            };
            if before < 0 {
                report.errors = dep_print_errors(&states);
            }
            if before == 0 {
                return report;
            }

            let mut view = states.clone();
            for s in view.iter_mut() {
                if self.is_frozen(&s.name) {
                    s.flags.immutable = true;
                }
            }
            let transition = dep_calc_trans(&ctx.graph, &view, &online, &self.planner);
            if transition.ops.is_empty() {
                return report;
            }
            (report, transition.ops, states.clone())
        };

        let execution = self.execute(&ctx, planned, &ops, &online).await;
        if let Some(e) = &execution.failure {
            warn!(error = %e, "Transition aborted");
        }
        report.applied = execution.applied;
        report.deferred = execution.delegated;
        report.deferred.extend(execution.held);

        report.after = dep_check(&ctx.graph, &mut *self.states.lock().await, &online);
        info!(
            before = report.before,
            after = report.after,
            applied = report.applied,
            deferred = report.deferred.len(),
            "Reconciliation pass complete"
        );
        report
    }

    /// Swap in a new configuration generation under the write side of
    /// `lock`. Returns the groups running here whose trees changed; they
    /// need a conditional stop followed by a conditional start.
    #[instrument(skip_all)]
    pub async fn reconfigure(&self, config: &ClusterConfig, lock: &tokio::sync::RwLock<()>) -> Vec<String> {
        let _write = lock.write().await;
        let new_ctx = ClusterContext::build(config);
        let old_ctx = self.context();

        let mut membership = new_ctx.membership.clone();
        {
            let current = self.membership.read();
            for m in current.members() {
                membership.set_online(m.id, m.online);
            }
        }

        let mut states = self.states.lock().await;
        let mut fresh = new_ctx.allocate_states(&membership);
        for s in fresh.iter_mut() {
            if let Some(i) = find_state(&states, &s.name) {
                s.state = states[i].state;
                s.owner = states[i].owner;
                s.last_owner = states[i].last_owner;
            }
        }

        let mut changed = Vec::new();
        for old in states.iter().filter(|s| s.is_running() && s.owner == Some(self.local)) {
            let Some(old_lock) = old_ctx.group_tree(&old.name) else {
                continue;
            };
            let mut old_tree = old_lock.lock().await;
            let dirty = match new_ctx.group_tree(&old.name) {
                Some(new_lock) => {
                    let mut new_tree = new_lock.lock().await;
                    ResourceTree::mark_changes(&mut old_tree, &mut new_tree);
                    carry_node_states(&old_tree, &mut new_tree);
                    old_tree.nodes().any(|(_, n)| n.flags.needstop) || new_tree.nodes().any(|(_, n)| n.flags.needstart)
                }
                None => {
                    ResourceTree::mark_changes(&mut old_tree, &mut ResourceTree::default());
                    true
                }
            };
            if dirty {
                self.retired
                    .lock()
                    .insert(old.name.to_ascii_lowercase(), old_tree.clone());
                changed.push(old.name.clone());
            }
        }

        *states = fresh;
        *self.membership.write() = membership;
        *self.context.write() = Arc::new(new_ctx);
        info!(changed = changed.len(), "Reconfiguration complete");
        changed
    }
}

/// Unchanged nodes in `new` keep the runtime state of their counterpart.
fn carry_node_states(old: &ResourceTree, new: &mut ResourceTree) {
    let carried: Vec<_> = new
        .nodes()
        .filter(|(_, n)| !n.flags.needstart)
        .filter_map(|(id, _)| {
            let name = new.node_resource(id)?.name();
            let old_node = old.node(old.find_node(&name)?)?;
            Some((id, old_node.state))
        })
        .collect();
    for (id, state) in carried {
        if let Some(node) = new.node_mut(id) {
            node.state = state;
        }
    }
}

#[async_trait]
impl GroupHandler for GroupEngine {
    async fn handle(&self, group: &str, request: &GroupRequest) -> RequestOutcome {
        let kind = request.kind;
        if self.is_frozen(group)
            && !matches!(
                kind,
                RequestKind::Status | RequestKind::StatusInquiry | RequestKind::Freeze | RequestKind::Unfreeze
            )
        {
            return RequestOutcome::from_code(ReturnCode::Frozen);
        }

        match kind {
            RequestKind::Freeze => {
                self.frozen.lock().insert(group.to_ascii_lowercase());
                RequestOutcome::success()
            }
            RequestKind::Unfreeze => {
                self.frozen.lock().remove(&group.to_ascii_lowercase());
                RequestOutcome::success()
            }
            RequestKind::Status if self.is_frozen(group) => RequestOutcome::success(),
            RequestKind::Status => self.check_status(group).await,
            RequestKind::StatusInquiry => {
                let states = self.states.lock().await;
                match find_state(&states, group) {
                    Some(i) => match states[i].owner {
                        Some(node) => RequestOutcome::success().with_owner(node),
                        None => RequestOutcome::success(),
                    },
                    None => RequestOutcome::from_code(ReturnCode::NoService),
                }
            }
            RequestKind::Enable if request.target.is_some_and(|t| t != self.local) => {
                RequestOutcome::from_code(ReturnCode::Forward)
            }
            RequestKind::Start
            | RequestKind::Enable
            | RequestKind::StartRemote
            | RequestKind::StartRecover
            | RequestKind::Stop
            | RequestKind::StopUser
            | RequestKind::Disable
            | RequestKind::Relocate => self.run_operation(group, kind, request.target).await,
            RequestKind::Exiting => self.run_operation(group, RequestKind::Stop, None).await,
            RequestKind::Restart => {
                let stopped = self.run_operation(group, RequestKind::StopUser, None).await;
                if !stopped.code.is_success() {
                    return stopped;
                }
                self.run_operation(group, RequestKind::Start, request.target).await
            }
            RequestKind::StopRecover => self.recover(group).await,
            RequestKind::Init => self.init_stop(group).await,
            RequestKind::CondStop | RequestKind::CondStart => self.conditional(group, kind).await,
            RequestKind::Migrate => RequestOutcome::from_code(ReturnCode::Invalid),
            RequestKind::None => RequestOutcome::success(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fixtures;
    use rgm_restree::{AgentInvocation, AgentOutcome, OcfOperation, OcfStatus, RecordingExecutor, RestreeResult};
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    /// Holds starts of one resource until released.
    struct GateExecutor {
        inner: RecordingExecutor,
        resource: String,
        entered: Notify,
        release: Semaphore,
    }

    #[async_trait]
    impl AgentExecutor for GateExecutor {
        async fn exec(&self, invocation: &AgentInvocation) -> RestreeResult<AgentOutcome> {
            if invocation.resource == self.resource && invocation.operation == OcfOperation::Start {
                self.entered.notify_one();
                let _permit = self.release.acquire().await;
            }
            self.inner.exec(invocation).await
        }
    }

    fn engine() -> (GroupEngine, Arc<RecordingExecutor>) {
        let executor = Arc::new(RecordingExecutor::new());
        let ctx = ClusterContext::build(&fixtures::cluster());
        let engine = GroupEngine::new(ctx, executor.clone(), &DaemonConfig::default());
        (engine, executor)
    }

    async fn state_of(engine: &GroupEngine, name: &str) -> ResourceState {
        let states = engine.states().await;
        states[find_state(&states, name).unwrap()].clone()
    }

    async fn run_remotely(engine: &GroupEngine, name: &str, node: u32) {
        let mut state = state_of(engine, name).await;
        state.state = RgState::Started;
        state.owner = Some(NodeId::new(node));
        engine.import_states(&[state]).await;
    }

    #[tokio::test]
    async fn test_start_runs_agents_locally() {
        let (engine, executor) = engine();
        let outcome = engine
            .handle("service:db", &GroupRequest::new(RequestKind::Start))
            .await;
        assert_eq!(outcome.code, ReturnCode::Success);
        assert_eq!(outcome.new_owner, Some(NodeId::new(1)));
        assert_eq!(
            executor.operations(),
            vec![("ip:10.0.0.1".to_string(), OcfOperation::Start)]
        );
        assert!(state_of(&engine, "service:db").await.is_running());
    }

    #[tokio::test]
    async fn test_dependent_start_refused() {
        let (engine, executor) = engine();
        let outcome = engine
            .handle("service:app", &GroupRequest::new(RequestKind::Start))
            .await;
        assert_eq!(outcome.code, ReturnCode::Depend);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_restricted_group_start_elsewhere_refused() {
        let (engine, _) = engine();
        let outcome = engine
            .handle(
                "service:web",
                &GroupRequest::new(RequestKind::Start).with_target(NodeId::new(2)),
            )
            .await;
        assert_eq!(outcome.code, ReturnCode::Depend);
    }

    #[tokio::test]
    async fn test_frozen_group_refuses_operations() {
        let (engine, _) = engine();
        engine.handle("service:db", &GroupRequest::new(RequestKind::Freeze)).await;
        assert!(engine.is_frozen("service:db"));

        let outcome = engine.handle("service:db", &GroupRequest::new(RequestKind::Start)).await;
        assert_eq!(outcome.code, ReturnCode::Frozen);
        let outcome = engine.handle("service:db", &GroupRequest::new(RequestKind::Status)).await;
        assert!(outcome.code.is_success());

        engine.handle("service:db", &GroupRequest::new(RequestKind::Unfreeze)).await;
        let outcome = engine.handle("service:db", &GroupRequest::new(RequestKind::Start)).await;
        assert!(outcome.code.is_success());
    }

    #[tokio::test]
    async fn test_migrate_and_unknown_group() {
        let (engine, _) = engine();
        let outcome = engine.handle("service:db", &GroupRequest::new(RequestKind::Migrate)).await;
        assert_eq!(outcome.code, ReturnCode::Invalid);
        let outcome = engine.handle("service:nope", &GroupRequest::new(RequestKind::Start)).await;
        assert_eq!(outcome.code, ReturnCode::NoService);
    }

    #[tokio::test]
    async fn test_remote_enable_is_forwarded() {
        let (engine, _) = engine();
        let request = GroupRequest::new(RequestKind::Enable).with_target(NodeId::new(2));
        let outcome = engine.handle("service:db", &request).await;
        assert_eq!(outcome.code, ReturnCode::Forward);
    }

    #[tokio::test]
    async fn test_reconcile_starts_everything() {
        let (engine, executor) = engine();
        let report = engine.reconcile().await;
        assert_eq!(report.before, 3);
        assert_eq!(report.after, 0);
        assert_eq!(report.applied, 3);

        let ops = executor.operations();
        let db = ops.iter().position(|(r, _)| r == "ip:10.0.0.1").unwrap();
        let app = ops.iter().position(|(r, _)| r == "script:app").unwrap();
        assert!(db < app);
        assert_eq!(engine.local_groups().await.len(), 3);
    }

    #[tokio::test]
    async fn test_status_failure_recovers_group() {
        let (engine, executor) = engine();
        engine.handle("service:db", &GroupRequest::new(RequestKind::Start)).await;
        executor.fail_on(
            "ip:10.0.0.1",
            OcfOperation::Status,
            AgentOutcome::Exited(OcfStatus::NotRunning),
        );

        let outcome = engine.handle("service:db", &GroupRequest::new(RequestKind::Status)).await;
        assert!(outcome.code.is_success());
        let ops: Vec<OcfOperation> = executor.operations().into_iter().map(|(_, op)| op).collect();
        assert_eq!(
            ops,
            vec![
                OcfOperation::Start,
                OcfOperation::Status,
                OcfOperation::Stop,
                OcfOperation::Start
            ]
        );
        assert_eq!(state_of(&engine, "service:db").await.state, RgState::Started);
    }

    #[tokio::test]
    async fn test_init_stops_without_touching_state() {
        let (engine, executor) = engine();
        engine.handle("service:db", &GroupRequest::new(RequestKind::Start)).await;
        let outcome = engine.handle("service:db", &GroupRequest::new(RequestKind::Init)).await;
        assert!(outcome.code.is_success());
        assert_eq!(executor.operations().last().unwrap().1, OcfOperation::Stop);
        assert_eq!(state_of(&engine, "service:db").await.state, RgState::Started);
    }

    #[tokio::test]
    async fn test_reconfigure_carries_state_and_flags_changes() {
        let (engine, executor) = engine();
        engine.handle("service:db", &GroupRequest::new(RequestKind::Start)).await;

        let mut config = fixtures::cluster();
        config
            .resources
            .push(rgm_restree::ResourceConfig::new("ip").attr("address", "10.0.0.2"));
        config.tree[0] = rgm_restree::TreeEntry::inline("service")
            .attr("name", "db")
            .child(rgm_restree::TreeEntry::reference("ip", "10.0.0.2"));
        let lock = tokio::sync::RwLock::new(());
        let changed = engine.reconfigure(&config, &lock).await;
        assert_eq!(changed, vec!["service:db".to_string()]);
        assert!(state_of(&engine, "service:db").await.is_running());

        engine.handle("service:db", &GroupRequest::new(RequestKind::CondStop)).await;
        engine.handle("service:db", &GroupRequest::new(RequestKind::CondStart)).await;
        assert_eq!(
            executor.operations(),
            vec![
                ("ip:10.0.0.1".to_string(), OcfOperation::Start),
                ("ip:10.0.0.1".to_string(), OcfOperation::Stop),
                ("ip:10.0.0.2".to_string(), OcfOperation::Start),
            ]
        );
    }

    #[tokio::test]
    async fn test_groups_start_while_another_group_agent_runs() {
        let gate = Arc::new(GateExecutor {
            inner: RecordingExecutor::new(),
            resource: "ip:10.0.0.1".into(),
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        let ctx = ClusterContext::build(&fixtures::cluster());
        let engine = Arc::new(GroupEngine::new(ctx, gate.clone(), &DaemonConfig::default()));

        let db = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .handle("service:db", &GroupRequest::new(RequestKind::Start))
                    .await
            }
        });
        gate.entered.notified().await;

        let web = tokio::time::timeout(
            Duration::from_secs(2),
            engine.handle("service:web", &GroupRequest::new(RequestKind::Start)),
        )
        .await
        .expect("web start waited on the db agent");
        assert!(web.code.is_success());
        assert!(state_of(&engine, "service:web").await.is_running());
        assert!(!state_of(&engine, "service:db").await.is_running());

        gate.release.add_permits(1);
        assert!(db.await.unwrap().code.is_success());
        assert!(state_of(&engine, "service:db").await.is_running());
    }

    #[tokio::test]
    async fn test_stop_of_remote_owned_group_is_forwarded() {
        let (engine, executor) = engine();
        run_remotely(&engine, "service:db", 2).await;

        for kind in [
            RequestKind::Stop,
            RequestKind::StopUser,
            RequestKind::Disable,
            RequestKind::Relocate,
        ] {
            let outcome = engine.handle("service:db", &GroupRequest::new(kind)).await;
            assert_eq!(outcome.code, ReturnCode::Forward, "{}", kind);
            assert_eq!(outcome.new_owner, Some(NodeId::new(2)));
        }
        let db = state_of(&engine, "service:db").await;
        assert_eq!(db.state, RgState::Started);
        assert_eq!(db.owner, Some(NodeId::new(2)));

        // Still running on node 2, so a local enable must not start it twice.
        let outcome = engine.handle("service:db", &GroupRequest::new(RequestKind::Enable)).await;
        assert_eq!(outcome.code, ReturnCode::Depend);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stop_of_group_on_dead_node_is_local() {
        let (engine, _) = engine();
        run_remotely(&engine, "service:db", 2).await;
        engine.set_online(NodeId::new(2), false);

        let outcome = engine.handle("service:db", &GroupRequest::new(RequestKind::Disable)).await;
        assert!(outcome.code.is_success());
        let db = state_of(&engine, "service:db").await;
        assert_eq!(db.state, RgState::Disabled);
        assert_eq!(db.owner, None);
    }

    #[tokio::test]
    async fn test_remote_start_is_not_recorded_as_running() {
        let (engine, executor) = engine();
        let request = GroupRequest::new(RequestKind::Start).with_target(NodeId::new(2));
        let outcome = engine.handle("service:db", &request).await;
        assert_eq!(outcome.code, ReturnCode::Forward);
        assert_eq!(outcome.new_owner, Some(NodeId::new(2)));
        assert!(executor.calls().is_empty());

        let db = state_of(&engine, "service:db").await;
        assert_eq!(db.state, RgState::Stopped);
        assert_eq!(db.owner, None);
    }

    #[tokio::test]
    async fn test_relocate_stops_here_and_hands_start_over() {
        let (engine, executor) = engine();
        engine.handle("service:db", &GroupRequest::new(RequestKind::Start)).await;

        let request = GroupRequest::new(RequestKind::Relocate).with_target(NodeId::new(2));
        let outcome = engine.handle("service:db", &request).await;
        assert_eq!(outcome.code, ReturnCode::Forward);
        assert_eq!(outcome.new_owner, Some(NodeId::new(2)));
        assert_eq!(
            executor.operations(),
            vec![
                ("ip:10.0.0.1".to_string(), OcfOperation::Start),
                ("ip:10.0.0.1".to_string(), OcfOperation::Stop),
            ]
        );
        assert!(!state_of(&engine, "service:db").await.is_running());
    }

    #[tokio::test]
    async fn test_step_held_when_group_moved_after_planning() {
        let (engine, executor) = engine();
        let planned = engine.states().await;
        engine.handle("service:db", &GroupRequest::new(RequestKind::Start)).await;

        let ops = vec![
            PlanOp::start("service:db", NodeId::new(1), 0),
            PlanOp::start("service:app", NodeId::new(1), 1),
        ];
        let online = engine.membership().online_ids();
        let execution = engine.execute(&engine.context(), planned, &ops, &online).await;
        assert_eq!(execution.applied, 0);
        assert_eq!(
            execution.held,
            vec!["service:db".to_string(), "service:app".to_string()]
        );
        assert!(execution.failure.is_none());
        assert_eq!(executor.operations().len(), 1);
    }
}
