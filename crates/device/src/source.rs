use crate::error::{Error, ErrorKind, Result};
use crate::session::{DatabaseId, DeviceSession, StateIndex};
use handheld_record::{Record, RecordSource};
use std::collections::VecDeque;

struct Cursor {
    database: String,
    id: DatabaseId,
    pending: VecDeque<StateIndex>,
}

/// Reads every record of a list of databases off a device, one database at
/// a time, in state index order.
///
/// The state table of a database is fetched when the source first reaches
/// it, so a source over many databases does not front-load the whole
/// device.
pub struct DeviceSource<'a> {
    session: &'a mut dyn DeviceSession,
    databases: VecDeque<String>,
    cursor: Option<Cursor>,
    ended: bool,
}

impl<'a> DeviceSource<'a> {
    pub fn new(session: &'a mut dyn DeviceSession, databases: impl IntoIterator<Item = String>) -> Self {
        Self {
            session,
            databases: databases.into_iter().collect(),
            cursor: None,
            ended: false,
        }
    }

    /// Source over every database in the device catalog.
    pub fn all(session: &'a mut dyn DeviceSession) -> Result<Self> {
        let names: Vec<_> = session.catalog()?.into_iter().map(|descriptor| descriptor.name).collect();
        Ok(Self::new(session, names))
    }

    /// Name of the database currently being read, if any.
    pub fn current_database(&self) -> Option<&str> {
        self.cursor.as_ref().map(|cursor| cursor.database.as_str())
    }

    /// Abandon the rest of the current database.
    pub fn skip_database(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            tracing::debug!(database = %cursor.database, remaining = cursor.pending.len(), "Skipping rest of database");
        }
    }

    fn enter(&mut self, database: String) -> Result<()> {
        let id = self.session.database_id(&database)?;
        let table = self.session.state_table(id)?;
        tracing::debug!(%database, records = table.len(), "Reading database");
        self.cursor = Some(Cursor {
            database,
            id,
            pending: table.iter().map(|(index, _)| index).collect(),
        });
        Ok(())
    }
}

impl RecordSource for DeviceSource<'_> {
    type ErrorKind = ErrorKind;

    fn next_record(&mut self) -> std::result::Result<Option<Record>, Error> {
        while !self.ended {
            if let Some(cursor) = self.cursor.as_mut() {
                if let Some(index) = cursor.pending.pop_front() {
                    let id = cursor.id;
                    return self.session.read_record(id, index).map(Some);
                }
                self.cursor = None;
            }
            match self.databases.pop_front() {
                Some(database) => self.enter(database)?,
                None => self.ended = true,
            }
        }
        Ok(None)
    }

    fn end_of_stream(&self) -> bool {
        self.ended
    }
}
