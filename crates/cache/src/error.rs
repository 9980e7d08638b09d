//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use handheld_device::error::{Error as DeviceError, ErrorKind as DeviceErrorKind};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The database is not in the device catalog.
    #[display("unknown database: {_0}")]
    UnknownDatabase(#[error(not(source))] String),
    /// The database does not accept edits. Tell the user, don't retry.
    #[display("database is read-only: {_0}")]
    ReadOnly(#[error(not(source))] String),
    /// The record is no longer on the device; reload the database.
    #[display("record {_0:08x} no longer exists on the device")]
    StaleEntry(#[error(not(source))] u64),
    /// The device lost track of a record it just accepted; reconnect.
    #[display("added record missing from {_0}, reconnect the device")]
    Reconnect(#[error(not(source))] String),
    /// Any other device failure.
    #[display("device error: {_0}")]
    Device(DeviceErrorKind),
    /// The background worker could not be started.
    #[display("could not start worker thread")]
    Spawn,
}

impl ErrorKind {
    /// Convert a device error into a cache error, preserving the device
    /// crate's `Exn` frame as a child in the error tree. Read-only failures
    /// become [`ErrorKind::ReadOnly`].
    #[track_caller]
    pub fn device(err: DeviceError) -> Error {
        let kind = match &*err {
            DeviceErrorKind::ReadOnly(database) => ErrorKind::ReadOnly(database.clone()),
            other => ErrorKind::Device(other.clone()),
        };
        err.raise(kind)
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Device(inner) => inner.is_retryable(),
            Self::Spawn => true,
            _ => false,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly(_))
    }
}
