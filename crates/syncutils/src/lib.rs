//! Small synchronisation primitives shared by the background jobs.
//!
//! - [`CancelToken`]: cooperative cancellation flag polled by a worker.
//! - [`wait_gate`]: single-slot rendezvous letting a worker block until
//!   the GUI thread has serviced a request, without the GUI thread ever
//!   blocking itself.

mod cancel;
mod gate;

pub use crate::cancel::CancelToken;
pub use crate::gate::{ScopeSignaler, SyncWaitGate, wait_gate};
