//! Device Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::StateIndex;
use derive_more::{Display, Error};

/// A device error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The session was used before it was opened, or after the link dropped.
    #[display("device session is not open")]
    NotConnected,
    /// Transport-level failure talking to the device.
    #[display("device unreachable: {_0}")]
    Unreachable(#[error(not(source))] String),
    /// No device with this PIN is on the bus.
    #[display("no device with PIN {_0:08x}")]
    UnknownDevice(#[error(not(source))] u32),
    /// The device is locked and no password was supplied.
    #[display("password required ({remaining_tries} tries remaining)")]
    PasswordRequired { remaining_tries: u32 },
    /// The supplied password was rejected.
    #[display("bad password ({remaining_tries} tries remaining)")]
    BadPassword { remaining_tries: u32 },
    /// The device refuses further password attempts.
    #[display("password attempts exhausted")]
    PasswordExhausted,
    /// The named database does not exist on this device.
    #[display("database not found: {_0}")]
    DatabaseNotFound(#[error(not(source))] String),
    /// Nothing lives at this state index (it may have been renumbered).
    #[display("no record at state index {_0}")]
    NoSuchRecord(#[error(not(source))] StateIndex),
    /// The database does not accept writes.
    #[display("database is read-only: {_0}")]
    ReadOnly(#[error(not(source))] String),
    /// The device rejected a command.
    #[display("device rejected command: {_0}")]
    Rejected(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Returns `true` if the failure was a write against a read-only database.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly(_))
    }

    /// Returns `true` if the connection itself is unusable, as opposed to a
    /// single command failing.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Unreachable(_) | Self::UnknownDevice(_) | Self::PasswordExhausted
        )
    }

    /// Remaining password attempts, if this error asks for a password.
    pub fn password_tries(&self) -> Option<u32> {
        match self {
            Self::PasswordRequired { remaining_tries } | Self::BadPassword { remaining_tries } => Some(*remaining_tries),
            _ => None,
        }
    }
}
