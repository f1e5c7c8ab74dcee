//! Reconciliation loop and membership event handling

mod reconciler;

pub use reconciler::{MembershipEvent, Reconciler};
