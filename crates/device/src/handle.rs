use crate::bus::DeviceInfo;
use crate::session::DeviceSession;
use crate::BoxSession;
use parking_lot::{Mutex, MutexGuard};
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// A connected device whose session can only be driven by one thread at a
/// time.
///
/// Every database command goes through a [`DeviceGuard`]; holding the guard
/// is the only way to reach the session. Commands issued under one guard
/// are never interleaved with another thread's commands.
pub struct ExclusiveDevice {
    info: DeviceInfo,
    session: Mutex<BoxSession>,
}

impl ExclusiveDevice {
    /// Wrap an already opened session.
    ///
    /// Panics if the session is not open: handing out a handle to a dead
    /// session is a programming error in the bus implementation.
    pub fn new(info: DeviceInfo, session: BoxSession) -> Self {
        assert!(session.is_open(), "ExclusiveDevice::new: session for {info} is not open");
        Self {
            info,
            session: Mutex::new(session),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Block until exclusive access is available.
    pub fn acquire(&self) -> DeviceGuard<'_> {
        let guard = self.session.lock();
        tracing::trace!(device = %self.info, "Device acquired");
        DeviceGuard { info: &self.info, guard }
    }

    /// Take exclusive access only if nobody else holds it right now.
    pub fn try_acquire(&self) -> Option<DeviceGuard<'_>> {
        let guard = self.session.try_lock()?;
        tracing::trace!(device = %self.info, "Device acquired");
        Some(DeviceGuard { info: &self.info, guard })
    }
}

impl Debug for ExclusiveDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExclusiveDevice")
            .field("info", &self.info)
            .field("locked", &self.session.is_locked())
            .finish()
    }
}

/// Exclusive access to a device's session; released on drop.
pub struct DeviceGuard<'a> {
    info: &'a DeviceInfo,
    guard: MutexGuard<'a, BoxSession>,
}

impl DeviceGuard<'_> {
    pub fn info(&self) -> &DeviceInfo {
        self.info
    }

    pub fn session(&mut self) -> &mut dyn DeviceSession {
        &mut **self.guard
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        tracing::trace!(device = %self.info, "Device released");
    }
}
