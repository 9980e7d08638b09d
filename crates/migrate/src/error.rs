//! Migration Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use handheld_archive::error::{Error as ArchiveError, ErrorKind as ArchiveErrorKind};
use handheld_device::error::{Error as DeviceError, ErrorKind as DeviceErrorKind};

/// A migration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The user asked the job to stop, or abandoned a prompt.
    #[display("cancelled by user")]
    Cancelled,
    /// A device failure the job cannot recover from.
    #[display("device error: {_0}")]
    Device(DeviceErrorKind),
    /// Reading or writing the backup archive failed.
    #[display("archive error: {_0}")]
    Archive(ArchiveErrorKind),
    /// The worker thread could not be started.
    #[display("could not start migration worker")]
    Spawn,
}

impl ErrorKind {
    /// Convert a device error, keeping the device crate's `Exn` frame as a
    /// child in the error tree.
    #[track_caller]
    pub fn device(err: DeviceError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Device(inner))
    }

    /// Convert an archive error, keeping the archive crate's `Exn` frame as
    /// a child in the error tree.
    #[track_caller]
    pub fn archive(err: ArchiveError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Archive(inner))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Device(inner) => inner.is_retryable(),
            Self::Archive(inner) => inner.is_retryable(),
            Self::Spawn => true,
            Self::Cancelled => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
