//! Reconciliation loop
//!
//! Periodic ticks queue status checks for the groups running here and then
//! run one evaluation pass. Membership events and reconfigurations trigger
//! a pass immediately.

use std::sync::Arc;

use rgm_thread::{Enqueued, GroupRequest, GroupThreadManager};
use rgm_types::{NodeId, RequestKind};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::cluster::ClusterConfig;
use crate::config::DaemonConfig;
use crate::engine::{GroupEngine, ReconcileReport};
use crate::error::{DaemonError, DaemonResult};

/// Input to the reconciler from membership and configuration sources.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    NodeUp(NodeId),
    NodeDown(NodeId),
    Reconfigure(Box<ClusterConfig>),
}

/// Drives periodic status checks and evaluation passes
pub struct Reconciler {
    config: DaemonConfig,
    manager: GroupThreadManager<GroupEngine>,
    event_tx: mpsc::Sender<MembershipEvent>,
    running: Arc<RwLock<bool>>,
}

impl Reconciler {
    /// Create a new reconciler and the receiving end of its event channel
    pub fn new(
        config: DaemonConfig,
        manager: GroupThreadManager<GroupEngine>,
    ) -> (Arc<Self>, mpsc::Receiver<MembershipEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let reconciler = Arc::new(Self {
            config,
            manager,
            event_tx,
            running: Arc::new(RwLock::new(false)),
        });
        (reconciler, event_rx)
    }

    pub fn engine(&self) -> &Arc<GroupEngine> {
        self.manager.handler()
    }

    pub fn manager(&self) -> &GroupThreadManager<GroupEngine> {
        &self.manager
    }

    /// Queue a request for a configured group
    pub fn submit(&self, group: &str, request: GroupRequest) -> DaemonResult<Enqueued> {
        if !self.engine().context().has_group(group) {
            return Err(DaemonError::group_not_found(group));
        }
        Ok(self.manager.enqueue(group, request, 0)?)
    }

    /// Queue a membership or configuration event
    pub async fn notify(&self, event: MembershipEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::warn!("Reconciler is not running; event dropped");
        }
    }

    /// Run until [`Reconciler::stop`] is called or every sender is gone
    pub async fn start(self: Arc<Self>, mut event_rx: mpsc::Receiver<MembershipEvent>) {
        *self.running.write().await = true;
        tracing::info!(interval_secs = self.config.reconcile.interval_secs, "Reconciler started");

        let mut ticker = interval(Duration::from_secs(self.config.reconcile.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.config.reconcile.status_checks {
                        self.queue_status_checks().await;
                    }
                    self.reconcile().await;
                }
                Some(event) = event_rx.recv() => {
                    self.handle_event(event).await;
                }
                else => break,
            }

            if !*self.running.read().await {
                break;
            }
        }

        tracing::info!("Reconciler stopped");
    }

    /// Stop the loop after the current iteration
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    async fn queue_status_checks(&self) {
        let max = self.config.threads.status_queue_max;
        for group in self.engine().local_groups().await {
            match self.manager.enqueue(&group, GroupRequest::new(RequestKind::Status), max) {
                Ok(Enqueued::Queued) => {}
                Ok(Enqueued::Dropped) => {
                    tracing::debug!(group = %group, "Status check already pending");
                }
                Err(e) => {
                    tracing::debug!(group = %group, error = %e, "Status check not queued");
                }
            }
        }
    }

    /// One evaluation pass, serialized against reconfiguration
    pub async fn reconcile(&self) -> ReconcileReport {
        let lock = self.manager.config_lock();
        let _read = lock.read().await;
        self.engine().reconcile().await
    }

    pub async fn handle_event(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::NodeUp(node) => self.membership_changed(node, true).await,
            MembershipEvent::NodeDown(node) => self.membership_changed(node, false).await,
            MembershipEvent::Reconfigure(config) => {
                let lock = self.manager.config_lock();
                let changed = self.engine().reconfigure(&config, &lock).await;
                for group in changed {
                    for kind in [RequestKind::CondStop, RequestKind::CondStart] {
                        if let Err(e) = self.submit(&group, GroupRequest::new(kind)) {
                            tracing::error!(group = %group, request = %kind, error = %e, "Failed to queue reconfiguration");
                        }
                    }
                }
                self.manager.wait_idle().await;
                self.reconcile().await;
            }
        }
    }

    async fn membership_changed(&self, node: NodeId, online: bool) {
        if !self.engine().set_online(node, online) {
            tracing::warn!(node = %node, "Membership event for unknown node");
            return;
        }
        tracing::info!(node = %node, online, "Membership changed");
        self.reconcile().await;
    }
}
