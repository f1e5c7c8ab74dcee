//! RGM Thread - Per-resource-group request serialization
//!
//! All operations against one resource group run one at a time, in queue
//! order, on a worker task owned by that group. Workers are spawned on
//! demand and exit when their queue drains.
//!
//! ## Queue rules
//!
//! - INIT purges everything queued before it (callers get EABORT).
//! - A `max` argument bounds how many requests of one kind may be pending.
//! - While a RELOCATE runs, start-class requests are refused with EDEADLCK.
//! - A successful stop, disable, restart or migrate drops queued status
//!   checks.

#![deny(unsafe_code)]

pub mod error;
pub mod manager;
pub mod request;

pub use error::{ThreadError, ThreadResult};
pub use manager::{GroupHandler, GroupThreadManager, RecordingHandler, RequestForwarder, WorkerInfo, WorkerStatus};
pub use request::{Enqueued, GroupRequest, RequestOutcome};
