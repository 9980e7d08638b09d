//! Single-record transfer between a [`RecordSource`] and a [`RecordSink`].
//!
//! The pipe holds no state of its own: the only cursor is the one inside
//! the source. Failures on either side propagate to the caller untouched;
//! any retry or skip policy belongs to whoever drives the pipe.

use crate::{RecordSink, RecordSource};
use exn::Exn;
use std::error::Error as StdError;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

/// Which end of the pipe failed.
pub enum PumpError<R, W>
where
    R: StdError + Send + Sync + 'static,
    W: StdError + Send + Sync + 'static,
{
    /// The source failed to produce the next record. Nothing was handed to
    /// the sink.
    Read(Exn<R>),
    /// The sink rejected a record.
    Write {
        database: String,
        unique_id: u64,
        error: Exn<W>,
    },
}

impl<R, W> Display for PumpError<R, W>
where
    R: StdError + Send + Sync + 'static,
    W: StdError + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Read(error) => write!(f, "failed reading record: {}", &**error),
            Self::Write { database, unique_id, error } => {
                write!(f, "failed writing record {database}/{unique_id:08x}: {}", &**error)
            },
        }
    }
}

impl<R, W> Debug for PumpError<R, W>
where
    R: StdError + Send + Sync + 'static,
    W: StdError + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Read(error) => f.debug_tuple("Read").field(&**error).finish(),
            Self::Write { database, unique_id, error } => f
                .debug_struct("Write")
                .field("database", database)
                .field("unique_id", unique_id)
                .field("error", &**error)
                .finish(),
        }
    }
}

/// Move exactly one record from `source` to `sink`.
///
/// Returns `Ok(false)` without touching the sink when the source has no
/// more records, `Ok(true)` once a record was delivered.
///
/// ```
/// # use handheld_record::{RecordSink, RecordSource, pump};
/// fn drain<S: RecordSource, K: RecordSink>(source: &mut S, sink: &mut K) -> u64 {
///     let mut delivered = 0;
///     while !source.end_of_stream() {
///         match pump(&mut *source, &mut *sink) {
///             Ok(true) => delivered += 1,
///             Ok(false) | Err(_) => break,
///         }
///     }
///     delivered
/// }
/// ```
pub fn pump<S, K>(source: &mut S, sink: &mut K) -> Result<bool, PumpError<S::ErrorKind, K::ErrorKind>>
where
    S: RecordSource + ?Sized,
    K: RecordSink + ?Sized,
{
    let Some(record) = source.next_record().map_err(PumpError::Read)? else {
        return Ok(false);
    };
    let database = record.database().to_string();
    let unique_id = record.unique_id();
    sink.write_record(record)
        .map_err(|error| PumpError::Write { database, unique_id, error })?;
    Ok(true)
}

/// Pump until the source reports the end of its stream, returning the
/// number of records delivered.
pub fn pump_all<S, K>(source: &mut S, sink: &mut K) -> Result<u64, PumpError<S::ErrorKind, K::ErrorKind>>
where
    S: RecordSource + ?Sized,
    K: RecordSink + ?Sized,
{
    let mut delivered = 0;
    while !source.end_of_stream() {
        if pump(source, sink)? {
            delivered += 1;
        }
    }
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;
    use derive_more::{Display, Error};
    use rstest::rstest;
    use std::collections::VecDeque;

    #[derive(Debug, Display, Error)]
    enum TestErrorKind {
        Broken,
    }

    struct VecSource {
        records: VecDeque<Record>,
        fail_at: Option<usize>,
        served: usize,
        ended: bool,
    }
    impl VecSource {
        fn new(records: impl IntoIterator<Item = Record>) -> Self {
            Self {
                records: records.into_iter().collect(),
                fail_at: None,
                served: 0,
                ended: false,
            }
        }
    }
    impl RecordSource for VecSource {
        type ErrorKind = TestErrorKind;

        fn next_record(&mut self) -> Result<Option<Record>, Exn<TestErrorKind>> {
            if self.fail_at == Some(self.served) {
                exn::bail!(TestErrorKind::Broken);
            }
            self.served += 1;
            let next = self.records.pop_front();
            self.ended = next.is_none();
            Ok(next)
        }

        fn end_of_stream(&self) -> bool {
            self.ended
        }
    }

    #[derive(Default)]
    struct VecSink {
        written: Vec<Record>,
        reject: Option<u64>,
    }
    impl RecordSink for VecSink {
        type ErrorKind = TestErrorKind;

        fn write_record(&mut self, record: Record) -> Result<(), Exn<TestErrorKind>> {
            if self.reject == Some(record.unique_id()) {
                exn::bail!(TestErrorKind::Broken);
            }
            self.written.push(record);
            Ok(())
        }
    }

    fn records(count: u64) -> Vec<Record> {
        (0..count).map(|id| Record::new(if id % 2 == 0 { "A" } else { "B" }, id, 1, vec![id as u8])).collect()
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(7)]
    fn test_pump_delivers_in_order_without_drops(#[case] count: u64) {
        let expected = records(count);
        let mut source = VecSource::new(expected.clone());
        let mut sink = VecSink::default();
        let mut calls = 0;
        while !source.end_of_stream() {
            if pump(&mut source, &mut sink).unwrap() {
                calls += 1;
            }
        }
        assert_eq!(calls, count);
        assert_eq!(sink.written, expected);
    }

    #[test]
    fn test_end_of_stream_is_idempotent() {
        let mut source = VecSource::new(records(1));
        let mut sink = VecSink::default();
        assert!(pump(&mut source, &mut sink).unwrap());
        assert!(!pump(&mut source, &mut sink).unwrap());
        assert!(source.end_of_stream());
        assert!(source.end_of_stream());
        assert!(!pump(&mut source, &mut sink).unwrap());
        assert_eq!(sink.written.len(), 1);
    }

    #[test]
    fn test_read_failure_leaves_sink_untouched() {
        let mut source = VecSource::new(records(3));
        source.fail_at = Some(1);
        let mut sink = VecSink::default();
        assert!(pump(&mut source, &mut sink).unwrap());
        let err = pump(&mut source, &mut sink).unwrap_err();
        assert!(matches!(err, PumpError::Read(_)));
        assert_eq!(sink.written.len(), 1);
    }

    #[test]
    fn test_write_failure_names_the_record() {
        let mut source = VecSource::new(records(3));
        let mut sink = VecSink { reject: Some(1), ..Default::default() };
        assert!(pump(&mut source, &mut sink).unwrap());
        match pump(&mut source, &mut sink).unwrap_err() {
            PumpError::Write { database, unique_id, .. } => {
                assert_eq!(database, "B");
                assert_eq!(unique_id, 1);
            },
            PumpError::Read(_) => panic!("expected a write failure"),
        }
        // No retry: the rejected record is gone, the next one flows.
        assert!(pump(&mut source, &mut sink).unwrap());
        assert_eq!(sink.written.iter().map(Record::unique_id).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_pump_all_counts() {
        let mut source = VecSource::new(records(4));
        let mut sink = VecSink::default();
        assert_eq!(pump_all(&mut source, &mut sink).unwrap(), 4);
        assert!(source.end_of_stream());
    }
}
