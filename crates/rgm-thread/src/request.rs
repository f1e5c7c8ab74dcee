//! Queued requests and their replies

use chrono::{DateTime, Utc};
use rgm_types::{NodeId, RequestKind, ReturnCode};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// What a worker replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub code: ReturnCode,
    /// Node the group ended up on, when the request moved it.
    pub new_owner: Option<NodeId>,
}

impl RequestOutcome {
    pub fn success() -> Self {
        Self::from_code(ReturnCode::Success)
    }

    pub fn from_code(code: ReturnCode) -> Self {
        Self { code, new_owner: None }
    }

    pub fn with_owner(mut self, node: NodeId) -> Self {
        self.new_owner = Some(node);
        self
    }
}

/// A request waiting in, or taken from, a group queue.
#[derive(Debug)]
pub struct GroupRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    pub target: Option<NodeId>,
    pub arg0: i32,
    pub queued_at: DateTime<Utc>,
    reply: Option<oneshot::Sender<RequestOutcome>>,
}

impl GroupRequest {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: None,
            arg0: 0,
            queued_at: Utc::now(),
            reply: None,
        }
    }

    pub fn with_target(mut self, node: NodeId) -> Self {
        self.target = Some(node);
        self
    }

    pub fn with_arg(mut self, arg0: i32) -> Self {
        self.arg0 = arg0;
        self
    }

    /// Attach a reply channel and return its receiving end.
    pub fn with_reply(mut self) -> (Self, oneshot::Receiver<RequestOutcome>) {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        (self, rx)
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Send the reply, if anyone is waiting for one. Returns whether a
    /// reply was delivered.
    pub fn respond(&mut self, outcome: RequestOutcome) -> bool {
        match self.reply.take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Result of `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Enough requests of the same kind were already pending.
    Dropped,
}
