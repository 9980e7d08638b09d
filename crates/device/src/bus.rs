use crate::DeviceHandle;
use crate::error::Result;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A device found by probing the bus. Identity is the PIN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    pub pin: u32,
    /// User-configured device name (may be empty).
    pub name: String,
}

impl DeviceInfo {
    pub fn new(pin: u32, name: impl Into<String>) -> Self {
        Self { pin, name: name.into() }
    }
}

impl Display for DeviceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.name.is_empty() {
            write!(f, "{:08x}", self.pin)
        } else {
            write!(f, "{:08x} ({})", self.pin, self.name)
        }
    }
}

/// Finds devices and opens connections to them.
///
/// A bus hands out one shared [`DeviceHandle`] per physical device: calling
/// [`connect`](Self::connect) again for a device that is already connected
/// returns the same handle, so every caller contends on the same lock.
pub trait DeviceBus: Send + Sync {
    /// List the devices currently plugged in.
    fn probe(&self) -> Result<Vec<DeviceInfo>>;

    /// Connect to `device`, authenticating with `password` if it is locked.
    ///
    /// A locked device without (or with a wrong) password fails with
    /// [`PasswordRequired`](crate::error::ErrorKind::PasswordRequired) or
    /// [`BadPassword`](crate::error::ErrorKind::BadPassword), carrying the
    /// number of attempts left.
    fn connect(&self, device: &DeviceInfo, password: Option<&str>) -> Result<DeviceHandle>;
}
