use handheld_device::DeviceInfo;
use handheld_syncutils::ScopeSignaler;
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// Message from a migration worker to the GUI thread.
///
/// Requests carry the [`ScopeSignaler`] the worker is waiting on. Dropping
/// it without an answer (or answering with an empty password) abandons the
/// job.
pub enum MigrationEvent {
    /// Progress of the current phase.
    Status { text: String, processed: u64, total: u64 },
    /// The device is locked; reply with its password.
    PasswordRequest {
        device: DeviceInfo,
        remaining_tries: u32,
        reply: ScopeSignaler<String>,
    },
    /// Plug in the device to restore into, and reply with it. It must not
    /// be the `source` device.
    DestinationPinRequest {
        source: DeviceInfo,
        reply: ScopeSignaler<DeviceInfo>,
    },
    /// Something went wrong; shown to the user, the job carries on unless
    /// it also ends.
    ErrorMessage { text: String },
}

impl Debug for MigrationEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Status { text, processed, total } => f
                .debug_struct("Status")
                .field("text", text)
                .field("processed", processed)
                .field("total", total)
                .finish(),
            Self::PasswordRequest { device, remaining_tries, .. } => f
                .debug_struct("PasswordRequest")
                .field("device", device)
                .field("remaining_tries", remaining_tries)
                .finish_non_exhaustive(),
            Self::DestinationPinRequest { source, .. } => {
                f.debug_struct("DestinationPinRequest").field("source", source).finish_non_exhaustive()
            },
            Self::ErrorMessage { text } => f.debug_struct("ErrorMessage").field("text", text).finish(),
        }
    }
}
