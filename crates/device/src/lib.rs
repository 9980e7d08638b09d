//! Device access for the desktop manager.
//!
//! The transport itself lives behind two traits: a [`DeviceBus`] finds and
//! connects to devices, and a [`DeviceSession`] issues database commands on
//! one open connection. Everything else in the workspace talks to a device
//! through an [`ExclusiveDevice`], which serialises all commands behind a
//! single lock so the GUI thread and a background job never interleave.

mod bus;
pub mod error;
mod handle;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod session;
mod sink;
mod source;
mod state;

pub use crate::bus::{DeviceBus, DeviceInfo};
pub use crate::handle::{DeviceGuard, ExclusiveDevice};
pub use crate::session::{DatabaseId, DeviceSession, StateIndex};
pub use crate::sink::{DeviceSink, WriteMode};
pub use crate::source::DeviceSource;
pub use crate::state::StateTable;
use std::sync::Arc;

/// Shared handle to one connected device.
pub type DeviceHandle = Arc<ExclusiveDevice>;
/// Type-erased session as stored inside an [`ExclusiveDevice`].
pub type BoxSession = Box<dyn DeviceSession>;
