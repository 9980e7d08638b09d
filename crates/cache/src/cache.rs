use crate::DatabaseKind;
use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use handheld_device::{DatabaseId, DeviceHandle, DeviceSession, StateIndex, StateTable};
use handheld_record::Record;
use parking_lot::RwLock;

/// One cached record, with the state index the device used for it when the
/// cache last looked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    state_index: StateIndex,
    record: Record,
}

impl CacheEntry {
    pub fn state_index(&self) -> StateIndex {
        self.state_index
    }

    pub fn unique_id(&self) -> u64 {
        self.record.unique_id()
    }

    pub fn record(&self) -> &Record {
        &self.record
    }
}

struct Contents {
    table: StateTable,
    entries: Vec<CacheEntry>,
    // Set when a refresh failed after the device had already changed.
    stale: bool,
}

impl Contents {
    /// Take a fresh state table from the device and re-point every entry at
    /// its current state index.
    fn refresh(&mut self, session: &mut dyn DeviceSession, id: DatabaseId) -> Result<()> {
        let fresh = match session.state_table(id) {
            Ok(fresh) => fresh,
            Err(err) => {
                self.stale = true;
                return Err(ErrorKind::device(err));
            },
        };
        self.stale = false;
        self.table.refresh(fresh);
        for entry in &mut self.entries {
            match self.table.index_of(entry.unique_id()) {
                Some(index) => entry.state_index = index,
                None => tracing::debug!(unique_id = entry.unique_id(), "Cached record vanished from device"),
            }
        }
        Ok(())
    }

    fn current_index(&mut self, session: &mut dyn DeviceSession, id: DatabaseId, unique_id: u64) -> Result<StateIndex> {
        if self.stale {
            self.refresh(session, id)?;
        }
        self.table.index_of(unique_id).ok_or_raise(|| ErrorKind::StaleEntry(unique_id))
    }

    /// Refresh after a change the device has accepted, and find where the
    /// device put `unique_id`.
    ///
    /// The outer error means the record is not on the device after all. The
    /// inner result carries a failed refresh: the change stands, and the
    /// caller must still fold it into the cache before reporting the error.
    fn settle(
        &mut self,
        session: &mut dyn DeviceSession,
        id: DatabaseId,
        name: &str,
        unique_id: u64,
    ) -> Result<(Option<StateIndex>, Result<()>)> {
        let refreshed = self.refresh(session, id);
        let found = self.table.index_of(unique_id);
        if refreshed.is_ok() && found.is_none() {
            exn::bail!(ErrorKind::Reconnect(name.to_string()));
        }
        Ok((found, refreshed))
    }
}

/// All records of one device database, kept in step with the device.
///
/// Every edit goes to the device first, under the device lock, and the
/// state table is refreshed from the device before the edit returns, so an
/// entry handed back by one edit is immediately usable in the next.
/// Readers only ever see whole edits.
pub struct DatabaseCache {
    name: String,
    id: DatabaseId,
    kind: DatabaseKind,
    device: DeviceHandle,
    contents: RwLock<Contents>,
}

impl DatabaseCache {
    /// Read every record of `name` off the device.
    #[tracing::instrument(level = "info", skip(device), fields(device = %device.info()))]
    pub fn load(device: &DeviceHandle, name: &str) -> Result<Self> {
        let mut guard = device.acquire();
        let session = guard.session();
        let id = session.database_id(name).map_err(ErrorKind::device)?;
        let table = session.state_table(id).map_err(ErrorKind::device)?;
        let mut entries = Vec::with_capacity(table.len());
        for (state_index, _) in table.iter() {
            let record = session.read_record(id, state_index).map_err(ErrorKind::device)?;
            entries.push(CacheEntry { state_index, record });
        }
        tracing::info!(records = entries.len(), "Database cached");
        Ok(Self {
            name: name.to_string(),
            id,
            kind: DatabaseKind::for_database(name),
            device: DeviceHandle::clone(device),
            contents: RwLock::new(Contents {
                table,
                entries,
                stale: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    /// Snapshot of the cached entries: records added through this cache
    /// first, newest first, then the loaded records in state index order.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.contents.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.contents.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.read().entries.is_empty()
    }

    /// Cached entry for a unique ID.
    pub fn get(&self, unique_id: u64) -> Option<CacheEntry> {
        let contents = self.contents.read();
        contents.entries.iter().find(|entry| entry.unique_id() == unique_id).cloned()
    }

    /// Add a record to the device under a newly allocated unique ID.
    ///
    /// The unique ID and database name of `record` are replaced. Returns the
    /// new entry, holding the state index the device gave it.
    pub fn add(&self, record: Record) -> Result<CacheEntry> {
        let mut guard = self.device.acquire();
        let mut contents = self.contents.write();
        let unique_id = contents.table.make_new_record_id();
        let record = Record::new(self.name.as_str(), unique_id, record.record_type(), record.into_payload());
        tracing::debug!(database = %self.name, unique_id, "Adding record");
        guard.session().add_record(self.id, &record).map_err(ErrorKind::device)?;
        let (found, refreshed) = contents.settle(guard.session(), self.id, &self.name, unique_id)?;
        // Unresolved indexes are placeholders until the next refresh.
        let entry = CacheEntry {
            state_index: found.unwrap_or_default(),
            record,
        };
        contents.entries.insert(0, entry.clone());
        refreshed?;
        Ok(entry)
    }

    /// Replace the record behind `entry` with `record`'s contents, keeping
    /// its unique ID.
    ///
    /// Databases that cannot overwrite in place get a delete and re-add
    /// instead; callers see the same result either way. If the re-add fails
    /// the record is gone from the device, and from the cache too.
    pub fn overwrite(&self, entry: &CacheEntry, record: Record) -> Result<CacheEntry> {
        let unique_id = entry.unique_id();
        let record = Record::new(self.name.as_str(), unique_id, record.record_type(), record.into_payload());
        let mut guard = self.device.acquire();
        let mut contents = self.contents.write();
        let index = contents.current_index(guard.session(), self.id, unique_id)?;
        let mut removed_at = None;
        if self.kind.supports_in_place_overwrite() {
            tracing::debug!(database = %self.name, unique_id, index, "Overwriting record");
            guard.session().write_record(self.id, index, &record).map_err(ErrorKind::device)?;
        } else {
            tracing::debug!(database = %self.name, unique_id, index, "Replacing record");
            guard.session().delete_record(self.id, index).map_err(ErrorKind::device)?;
            removed_at = contents.entries.iter().position(|cached| cached.unique_id() == unique_id);
            if let Some(at) = removed_at {
                contents.entries.remove(at);
            }
            contents.refresh(guard.session(), self.id)?;
            if let Err(err) = guard.session().add_record(self.id, &record) {
                tracing::warn!(database = %self.name, unique_id, "Record deleted but not re-added");
                return Err(ErrorKind::device(err));
            }
        }
        let (found, refreshed) = contents.settle(guard.session(), self.id, &self.name, unique_id)?;
        let updated = CacheEntry {
            state_index: found.unwrap_or(index),
            record,
        };
        match removed_at {
            Some(at) => contents.entries.insert(at, updated.clone()),
            None => {
                if let Some(slot) = contents.entries.iter_mut().find(|cached| cached.unique_id() == unique_id) {
                    *slot = updated.clone();
                }
            },
        }
        refreshed?;
        Ok(updated)
    }

    /// Remove the record behind `entry` from the device and the cache.
    pub fn delete(&self, entry: &CacheEntry) -> Result<()> {
        let unique_id = entry.unique_id();
        let mut guard = self.device.acquire();
        let mut contents = self.contents.write();
        let index = contents.current_index(guard.session(), self.id, unique_id)?;
        tracing::debug!(database = %self.name, unique_id, index, "Deleting record");
        guard.session().delete_record(self.id, index).map_err(ErrorKind::device)?;
        contents.entries.retain(|cached| cached.unique_id() != unique_id);
        contents.refresh(guard.session(), self.id)
    }
}
