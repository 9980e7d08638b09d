//! Device records and the plumbing that moves them around.
//!
//! A [`Record`] is one entry of an on-device database, treated as an opaque
//! blob addressed by `(database, unique_id)`. Records are produced by a
//! [`RecordSource`] (a device database being read, an archive being
//! replayed) and consumed by a [`RecordSink`] (an archive being written, a
//! device database being restored). The [`pipe`] module joins the two
//! together one record at a time.

mod model;
pub mod pipe;

pub use crate::model::{DatabaseDescriptor, Record};
pub use crate::pipe::{PumpError, pump, pump_all};
use exn::Exn;
use std::error::Error as StdError;

/// Pull endpoint producing a stream of [`Record`]s.
pub trait RecordSource {
    type ErrorKind: StdError + Send + Sync + 'static;

    /// Read the next record, or `None` once the stream is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>, Exn<Self::ErrorKind>>;

    /// Returns `true` once the stream has been exhausted.
    ///
    /// Must be cheap, and keep returning `true` on every call after the
    /// stream ended.
    fn end_of_stream(&self) -> bool;
}

/// Push endpoint consuming [`Record`]s.
pub trait RecordSink {
    type ErrorKind: StdError + Send + Sync + 'static;

    fn write_record(&mut self, record: Record) -> Result<(), Exn<Self::ErrorKind>>;
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    type ErrorKind = S::ErrorKind;

    fn next_record(&mut self) -> Result<Option<Record>, Exn<Self::ErrorKind>> {
        (**self).next_record()
    }

    fn end_of_stream(&self) -> bool {
        (**self).end_of_stream()
    }
}

impl<K: RecordSink + ?Sized> RecordSink for &mut K {
    type ErrorKind = K::ErrorKind;

    fn write_record(&mut self, record: Record) -> Result<(), Exn<Self::ErrorKind>> {
        (**self).write_record(record)
    }
}
