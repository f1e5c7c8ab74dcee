//! Per-group workers.
//!
//! Every resource group gets its own FIFO queue and a worker task that is
//! spawned on the first request and exits once the queue drains. Requests
//! for one group never run concurrently; different groups do. Workers hold
//! the read side of the reconfigure lock while a request executes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rgm_types::{RequestKind, ReturnCode};
use serde::Serialize;
use tokio::sync::{Notify, RwLock, Semaphore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ThreadError, ThreadResult};
use crate::request::{Enqueued, GroupRequest, RequestOutcome};

/// Executes one request against one resource group.
#[async_trait]
pub trait GroupHandler: Send + Sync + 'static {
    async fn handle(&self, group: &str, request: &GroupRequest) -> RequestOutcome;
}

/// Receives requests the handler answered with `ReturnCode::Forward`.
/// The forwarder owns the reply channel from then on.
#[async_trait]
pub trait RequestForwarder: Send + Sync + 'static {
    async fn forward(&self, group: &str, request: GroupRequest);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    Running,
    Exiting,
}

/// One line of `dump()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub group: String,
    pub status: WorkerStatus,
    pub current: Option<RequestKind>,
    pub current_id: Option<Uuid>,
    pub queued: usize,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: Uuid,
    kind: RequestKind,
}

struct GroupQueue {
    name: String,
    pending: Mutex<VecDeque<GroupRequest>>,
    current: Mutex<Option<InFlight>>,
    exiting: AtomicBool,
}

impl GroupQueue {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pending: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            exiting: AtomicBool::new(false),
        }
    }

    fn info(&self) -> WorkerInfo {
        let current = *self.current.lock();
        WorkerInfo {
            group: self.name.clone(),
            status: if self.exiting.load(Ordering::SeqCst) {
                WorkerStatus::Exiting
            } else {
                WorkerStatus::Running
            },
            current: current.map(|c| c.kind),
            current_id: current.map(|c| c.id),
            queued: self.pending.lock().len(),
        }
    }
}

/// Drop every queued status check.
fn purge_status_checks(queue: &mut VecDeque<GroupRequest>) -> usize {
    let before = queue.len();
    queue.retain(|r| r.kind != RequestKind::Status);
    before - queue.len()
}

/// Drop everything, answering waiting callers with EABORT.
fn purge_all(queue: &mut VecDeque<GroupRequest>) -> usize {
    let n = queue.len();
    for mut req in queue.drain(..) {
        debug!(request = %req.kind, "Removed request");
        req.respond(RequestOutcome::from_code(ReturnCode::Abort));
    }
    n
}

struct Inner<H> {
    groups: DashMap<String, Arc<GroupQueue>>,
    handler: Arc<H>,
    forwarder: Option<Arc<dyn RequestForwarder>>,
    config_lock: Arc<RwLock<()>>,
    drained: Notify,
}

/// Registry of group workers.
pub struct GroupThreadManager<H: GroupHandler> {
    inner: Arc<Inner<H>>,
}

impl<H: GroupHandler> Clone for GroupThreadManager<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: GroupHandler> GroupThreadManager<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self::build(handler, None)
    }

    pub fn with_forwarder(handler: Arc<H>, forwarder: Arc<dyn RequestForwarder>) -> Self {
        Self::build(handler, Some(forwarder))
    }

    fn build(handler: Arc<H>, forwarder: Option<Arc<dyn RequestForwarder>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                groups: DashMap::new(),
                handler,
                forwarder,
                config_lock: Arc::new(RwLock::new(())),
                drained: Notify::new(),
            }),
        }
    }

    /// Global reconfigure lock. Workers take the read side per request; a
    /// reconfigure takes the write side.
    pub fn config_lock(&self) -> Arc<RwLock<()>> {
        self.inner.config_lock.clone()
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.inner.handler
    }

    /// Queue a request for `group`, spawning its worker if needed.
    ///
    /// With `max > 0` the request is dropped once `max` requests of the
    /// same kind are queued or running. INIT discards everything already
    /// queued.
    #[instrument(skip(self, request), fields(request = %request.kind))]
    pub fn enqueue(&self, group: &str, mut request: GroupRequest, max: usize) -> ThreadResult<Enqueued> {
        let mut spawned = false;
        let queue = {
            let entry = self.inner.groups.entry(group.to_string()).or_insert_with(|| {
                spawned = true;
                Arc::new(GroupQueue::new(group))
            });
            let queue = entry.value().clone();

            if queue.exiting.load(Ordering::SeqCst) {
                return Err(ThreadError::Exiting(group.to_string()));
            }

            let current = *queue.current.lock();
            let mut pending = queue.pending.lock();
            if request.kind == RequestKind::Init {
                let purged = purge_all(&mut pending);
                if purged > 0 {
                    info!(group, purged, "INIT purged queued requests");
                }
            } else if max > 0 {
                let count = pending.iter().filter(|r| r.kind == request.kind).count()
                    + usize::from(current.map(|c| c.kind) == Some(request.kind));
                if count >= max {
                    debug!(group, count, "Request dropped; queue limit reached");
                    return Ok(Enqueued::Dropped);
                }
            }

            if current.map(|c| c.kind) == Some(RequestKind::Relocate) {
                if request.kind.is_start_class() {
                    request.respond(RequestOutcome::from_code(ReturnCode::Deadlock));
                }
                warn!(group, "Failed to queue request: would block");
                return Err(ThreadError::WouldBlock(group.to_string()));
            }

            debug!(group, id = %request.id, "Queued request");
            pending.push_back(request);
            drop(pending);
            queue
        };

        if spawned {
            let inner = self.inner.clone();
            tokio::spawn(run_worker(inner, queue));
        }
        Ok(Enqueued::Queued)
    }

    pub fn is_active(&self, group: &str) -> bool {
        self.inner.groups.contains_key(group)
    }

    pub fn active_groups(&self) -> usize {
        self.inner.groups.len()
    }

    /// Snapshot of every live worker, sorted by group name.
    pub fn dump(&self) -> Vec<WorkerInfo> {
        let mut out: Vec<WorkerInfo> = self.inner.groups.iter().map(|e| e.value().info()).collect();
        out.sort_by(|a, b| a.group.cmp(&b.group));
        for w in &out {
            debug!(
                group = %w.group,
                status = ?w.status,
                current = ?w.current,
                queued = w.queued,
                "Worker"
            );
        }
        out
    }

    /// Wait until every worker has drained its queue and exited.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.groups.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// Drain one group queue, then exit. The next enqueue spawns a fresh
/// worker, so idle groups hold no task.
async fn run_worker<H: GroupHandler>(inner: Arc<Inner<H>>, queue: Arc<GroupQueue>) {
    debug!(group = %queue.name, "Worker started");
    loop {
        let next = queue.pending.lock().pop_front();
        let Some(mut request) = next else {
            // Only leave if nobody queued anything since the pop.
            if inner
                .groups
                .remove_if(&queue.name, |_, q| q.pending.lock().is_empty())
                .is_some()
            {
                break;
            }
            continue;
        };

        let kind = request.kind;
        *queue.current.lock() = Some(InFlight { id: request.id, kind });
        if kind == RequestKind::Exiting {
            queue.exiting.store(true, Ordering::SeqCst);
        }
        debug!(group = %queue.name, request = %kind, "Processing request");

        let outcome = {
            let _read = inner.config_lock.read().await;
            inner.handler.handle(&queue.name, &request).await
        };

        match kind {
            RequestKind::Init | RequestKind::Exiting => {
                purge_all(&mut queue.pending.lock());
            }
            RequestKind::Stop
            | RequestKind::StopUser
            | RequestKind::Disable
            | RequestKind::Restart
            | RequestKind::Migrate
                if outcome.code.is_success() =>
            {
                let purged = purge_status_checks(&mut queue.pending.lock());
                if purged > 0 {
                    debug!(group = %queue.name, purged, "Purged status checks");
                }
            }
            _ => {}
        }

        if outcome.code == ReturnCode::Forward {
            match &inner.forwarder {
                Some(forwarder) => forwarder.forward(&queue.name, request).await,
                None => {
                    warn!(group = %queue.name, request = %kind, "No forwarder configured");
                    request.respond(outcome);
                }
            }
        } else {
            if !outcome.code.is_success() {
                info!(group = %queue.name, request = %kind, code = outcome.code.code(), "Request failed");
            }
            request.respond(outcome);
        }
        *queue.current.lock() = None;

        if kind == RequestKind::Exiting {
            inner.groups.remove(&queue.name);
            break;
        }
    }
    inner.drained.notify_waiters();
    debug!(group = %queue.name, "Worker exited");
}

/// Handler that records requests and answers from a fixed table. It can
/// hold requests until released, to keep one in flight.
pub struct RecordingHandler {
    calls: Mutex<Vec<(String, RequestKind)>>,
    responses: Mutex<HashMap<RequestKind, ReturnCode>>,
    held: Mutex<HashSet<RequestKind>>,
    gate: Semaphore,
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            held: Mutex::new(HashSet::new()),
            gate: Semaphore::new(0),
        }
    }
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `kind` with `code` instead of success.
    pub fn respond_with(&self, kind: RequestKind, code: ReturnCode) {
        self.responses.lock().insert(kind, code);
    }

    /// Block requests of `kind` until `release` is called.
    pub fn hold(&self, kind: RequestKind) {
        self.held.lock().insert(kind);
    }

    /// Let `n` held requests finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> Vec<(String, RequestKind)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GroupHandler for RecordingHandler {
    async fn handle(&self, group: &str, request: &GroupRequest) -> RequestOutcome {
        self.calls.lock().push((group.to_string(), request.kind));
        let held = self.held.lock().contains(&request.kind);
        if held {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        let code = self
            .responses
            .lock()
            .get(&request.kind)
            .copied()
            .unwrap_or(ReturnCode::Success);
        RequestOutcome::from_code(code)
    }
}
