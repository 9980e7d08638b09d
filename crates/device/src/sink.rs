use crate::error::{Error, ErrorKind, Result};
use crate::session::{DatabaseId, DeviceSession};
use crate::state::StateTable;
use exn::OptionExt;
use handheld_record::{Record, RecordSink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// How restored records are merged into the destination databases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Empty each destination database before its first record is written.
    #[default]
    EraseAll,
    /// Overwrite records whose unique ID already exists, add the rest.
    AddAndOverwrite,
    /// Add records whose unique ID does not exist yet, leave the rest alone.
    AddOnly,
    /// Add every record under a freshly allocated unique ID.
    AddAsNew,
}

impl Display for WriteMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::EraseAll => "erase all, then restore",
            Self::AddAndOverwrite => "add new and overwrite existing",
            Self::AddOnly => "add only, don't overwrite existing",
            Self::AddAsNew => "add every record as a new entry",
        })
    }
}

struct Target {
    id: DatabaseId,
    table: StateTable,
    // Set after every mutation; the device may have renumbered.
    stale: bool,
}

/// Writes records into the databases they name, on an open device session.
pub struct DeviceSink<'a> {
    session: &'a mut dyn DeviceSession,
    mode: WriteMode,
    targets: HashMap<String, Target>,
    written: u64,
    skipped: u64,
}

impl<'a> DeviceSink<'a> {
    pub fn new(session: &'a mut dyn DeviceSession, mode: WriteMode) -> Self {
        Self {
            session,
            mode,
            targets: HashMap::new(),
            written: 0,
            skipped: 0,
        }
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Records left alone because they already existed ([`WriteMode::AddOnly`]).
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn target(&mut self, database: &str) -> Result<&mut Target> {
        if !self.targets.contains_key(database) {
            let id = self.session.database_id(database)?;
            let table = if self.mode == WriteMode::EraseAll {
                tracing::info!(%database, "Erasing database before restore");
                self.session.clear_database(id)?;
                StateTable::new()
            } else {
                self.session.state_table(id)?
            };
            self.targets.insert(database.to_string(), Target { id, table, stale: false });
        }
        let target = self.targets.get_mut(database).ok_or_raise(|| ErrorKind::DatabaseNotFound(database.to_string()))?;
        if target.stale {
            let fresh = self.session.state_table(target.id)?;
            target.table.refresh(fresh);
            target.stale = false;
        }
        Ok(target)
    }
}

impl RecordSink for DeviceSink<'_> {
    type ErrorKind = ErrorKind;

    fn write_record(&mut self, record: Record) -> std::result::Result<(), Error> {
        let mode = self.mode;
        let database = record.database().to_string();
        let target = self.target(&database)?;
        let id = target.id;
        let existing = target.table.index_of(record.unique_id());
        let record = match (mode, existing) {
            (WriteMode::AddOnly, Some(_)) => {
                tracing::trace!(%record, "Record exists, leaving it");
                self.skipped += 1;
                return Ok(());
            },
            (WriteMode::AddAsNew, _) => {
                let fresh = target.table.make_new_record_id();
                record.with_unique_id(fresh)
            },
            _ => record,
        };
        target.stale = true;
        match (mode, existing) {
            (WriteMode::AddAndOverwrite, Some(index)) => self.session.write_record(id, index, &record)?,
            _ => self.session.add_record(id, &record)?,
        }
        self.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use rstest::rstest;

    fn device() -> MockDevice {
        MockDevice::new()
            .with_database("Memos", [(1, b"old one".to_vec()), (2, b"old two".to_vec())])
            .renumbering_on_write()
    }

    fn restore(mock: &MockDevice, mode: WriteMode) -> Vec<(u64, Vec<u8>)> {
        let mut session = mock.open_session(None).unwrap();
        let mut sink = DeviceSink::new(&mut session, mode);
        sink.write_record(Record::new("Memos", 2, 0, b"new two".to_vec())).unwrap();
        sink.write_record(Record::new("Memos", 3, 0, b"new three".to_vec())).unwrap();
        let mut records = mock.records("Memos");
        records.sort();
        records
    }

    #[rstest]
    #[case(WriteMode::EraseAll, vec![(2, "new two"), (3, "new three")])]
    #[case(WriteMode::AddAndOverwrite, vec![(1, "old one"), (2, "new two"), (3, "new three")])]
    #[case(WriteMode::AddOnly, vec![(1, "old one"), (2, "old two"), (3, "new three")])]
    fn test_write_modes(#[case] mode: WriteMode, #[case] expected: Vec<(u64, &str)>) {
        let expected: Vec<_> = expected.into_iter().map(|(id, text)| (id, text.as_bytes().to_vec())).collect();
        assert_eq!(restore(&device(), mode), expected);
    }

    #[test]
    fn test_add_as_new_never_collides() {
        let records = restore(&device(), WriteMode::AddAsNew);
        assert_eq!(records.len(), 4);
        let mut ids: Vec<_> = records.iter().map(|(id, _)| *id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_read_only_surfaces() {
        let mock = MockDevice::new().with_database("Memos", []).with_read_only_database("Memos");
        let mut session = mock.open_session(None).unwrap();
        let mut sink = DeviceSink::new(&mut session, WriteMode::AddOnly);
        let err = sink.write_record(Record::new("Memos", 1, 0, vec![])).unwrap_err();
        assert!(err.is_read_only());
    }
}
