//! In-memory device for testing.

use crate::bus::{DeviceBus, DeviceInfo};
use crate::error::{ErrorKind, Result};
use crate::handle::ExclusiveDevice;
use crate::session::{DatabaseId, DeviceSession, StateIndex};
use crate::state::StateTable;
use crate::DeviceHandle;
use exn::OptionExt;
use handheld_record::{DatabaseDescriptor, Record};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type ReadHook = Arc<dyn Fn(u64) + Send + Sync>;

// Renumbered tables start this far above the previous base, so stale
// indexes never accidentally hit the right record.
const RENUMBER_STRIDE: StateIndex = 1000;

struct MockDatabase {
    name: String,
    read_only: bool,
    failing: bool,
    failing_adds: bool,
    records: BTreeMap<StateIndex, Record>,
    state_table_reads: usize,
    refusing_state_tables: bool,
}

impl MockDatabase {
    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            exn::bail!(ErrorKind::ReadOnly(self.name.clone()));
        }
        if self.failing {
            exn::bail!(ErrorKind::Rejected(format!("write to {} refused", self.name)));
        }
        Ok(())
    }

    fn next_index(&self) -> StateIndex {
        self.records.keys().next_back().map_or(0, |index| index + 1)
    }
}

struct MockState {
    databases: Vec<MockDatabase>,
    password: Option<String>,
    remaining_tries: u32,
    renumbering: bool,
    renumber_base: StateIndex,
    link_broken: bool,
    record_reads: usize,
    read_hook: Option<ReadHook>,
    read_delay: Option<Duration>,
}

impl MockState {
    fn database(&mut self, id: DatabaseId) -> Result<&mut MockDatabase> {
        if self.link_broken {
            exn::bail!(ErrorKind::Unreachable("link dropped".to_string()));
        }
        let slot = (id as usize).checked_sub(1);
        slot.and_then(|slot| self.databases.get_mut(slot))
            .ok_or_raise(|| ErrorKind::DatabaseNotFound(format!("#{id}")))
    }

    fn mutated(&mut self, id: DatabaseId) {
        if !self.renumbering {
            return;
        }
        self.renumber_base += RENUMBER_STRIDE;
        let base = self.renumber_base;
        if let Ok(database) = self.database(id) {
            let records = std::mem::take(&mut database.records);
            database.records = records.into_values().zip(base..).map(|(record, index)| (index, record)).collect();
        }
    }
}

/// A scriptable in-memory handheld.
///
/// Clones share the same underlying state, so a test can keep one clone for
/// inspection while the code under test drives a session opened from
/// another. Builder methods panic on nonsensical setup; a broken test setup
/// should not pass.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                databases: Vec::new(),
                password: None,
                remaining_tries: 0,
                renumbering: false,
                renumber_base: 0,
                link_broken: false,
                record_reads: 0,
                read_hook: None,
                read_delay: None,
            })),
        }
    }

    /// Add a database holding `(unique ID, payload)` records, at state
    /// indexes `0..n`.
    pub fn with_database(self, name: &str, records: impl IntoIterator<Item = (u64, Vec<u8>)>) -> Self {
        {
            let mut state = self.state.lock();
            assert!(
                !state.databases.iter().any(|database| database.name == name),
                "MockDevice::with_database: duplicate database {name}"
            );
            let records = records
                .into_iter()
                .zip(0..)
                .map(|((unique_id, payload), index)| (index, Record::new(name, unique_id, 0, payload)))
                .collect();
            state.databases.push(MockDatabase {
                name: name.to_string(),
                read_only: false,
                failing: false,
                failing_adds: false,
                records,
                state_table_reads: 0,
                refusing_state_tables: false,
            });
        }
        self
    }

    /// Mark an existing database as rejecting all writes as read-only.
    pub fn with_read_only_database(self, name: &str) -> Self {
        self.configure(name, |database| database.read_only = true);
        self
    }

    /// Make every write to an existing database fail with a device rejection.
    pub fn failing_writes_to(self, name: &str) -> Self {
        self.configure(name, |database| database.failing = true);
        self
    }

    /// Make adding records to an existing database fail with a device
    /// rejection, while overwrites and deletes still succeed.
    pub fn failing_adds_to(self, name: &str) -> Self {
        self.configure(name, |database| database.failing_adds = true);
        self
    }

    /// Lock the device behind `password`, allowing `tries` wrong attempts.
    pub fn with_password(self, password: &str, tries: u32) -> Self {
        {
            let mut state = self.state.lock();
            state.password = Some(password.to_string());
            state.remaining_tries = tries;
        }
        self
    }

    /// Reassign every state index of a database after each mutation.
    pub fn renumbering_on_write(self) -> Self {
        self.state.lock().renumbering = true;
        self
    }

    /// Call `hook` with the unique ID of every record read, after the read.
    pub fn on_record_read(self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.state.lock().read_hook = Some(Arc::new(hook));
        self
    }

    /// Slow down every record read.
    pub fn with_read_delay(self, delay: Duration) -> Self {
        self.state.lock().read_delay = Some(delay);
        self
    }

    /// Simulate the cable being pulled: every later command fails.
    pub fn break_link(&self) {
        self.state.lock().link_broken = true;
    }

    /// Make state table reads of a database fail until called again with
    /// `false`.
    pub fn refuse_state_tables(&self, name: &str, refuse: bool) {
        self.configure(name, |database| database.refusing_state_tables = refuse);
    }

    /// A new, unopened session on this device.
    pub fn session(&self) -> MockSession {
        MockSession {
            state: Arc::clone(&self.state),
            open: false,
        }
    }

    pub fn open_session(&self, password: Option<&str>) -> Result<MockSession> {
        let mut session = self.session();
        session.open(password)?;
        Ok(session)
    }

    /// Current `(unique ID, payload)` contents of a database, in state index
    /// order.
    pub fn records(&self, name: &str) -> Vec<(u64, Vec<u8>)> {
        let state = self.state.lock();
        state
            .databases
            .iter()
            .find(|database| database.name == name)
            .map(|database| {
                database.records.values().map(|record| (record.unique_id(), record.payload().to_vec())).collect()
            })
            .unwrap_or_default()
    }

    /// How many times the state table of a database was fetched.
    pub fn state_table_reads(&self, name: &str) -> usize {
        let state = self.state.lock();
        state.databases.iter().find(|database| database.name == name).map_or(0, |database| database.state_table_reads)
    }

    pub fn record_reads(&self) -> usize {
        self.state.lock().record_reads
    }

    fn configure(&self, name: &str, apply: impl FnOnce(&mut MockDatabase)) {
        let mut state = self.state.lock();
        let Some(database) = state.databases.iter_mut().find(|database| database.name == name) else {
            panic!("MockDevice: no database named {name}");
        };
        apply(database);
    }
}

/// Session on a [`MockDevice`].
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl MockSession {
    fn state(&self) -> Result<parking_lot::MutexGuard<'_, MockState>> {
        if !self.open {
            exn::bail!(ErrorKind::NotConnected);
        }
        Ok(self.state.lock())
    }
}

impl DeviceSession for MockSession {
    fn open(&mut self, password: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        let Some(expected) = state.password.clone() else {
            self.open = true;
            return Ok(());
        };
        if state.remaining_tries == 0 {
            exn::bail!(ErrorKind::PasswordExhausted);
        }
        match password {
            None => exn::bail!(ErrorKind::PasswordRequired {
                remaining_tries: state.remaining_tries
            }),
            Some(given) if given == expected => {
                self.open = true;
                Ok(())
            },
            Some(_) => {
                state.remaining_tries -= 1;
                if state.remaining_tries == 0 {
                    exn::bail!(ErrorKind::PasswordExhausted);
                }
                exn::bail!(ErrorKind::BadPassword {
                    remaining_tries: state.remaining_tries
                })
            },
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn catalog(&mut self) -> Result<Vec<DatabaseDescriptor>> {
        let state = self.state()?;
        if state.link_broken {
            exn::bail!(ErrorKind::Unreachable("link dropped".to_string()));
        }
        Ok(state
            .databases
            .iter()
            .map(|database| DatabaseDescriptor::new(database.name.clone(), database.records.len() as u32))
            .collect())
    }

    fn database_id(&mut self, name: &str) -> Result<DatabaseId> {
        let state = self.state()?;
        let slot = state.databases.iter().position(|database| database.name == name);
        let slot = slot.ok_or_raise(|| ErrorKind::DatabaseNotFound(name.to_string()))?;
        Ok(slot as DatabaseId + 1)
    }

    fn state_table(&mut self, id: DatabaseId) -> Result<StateTable> {
        let mut state = self.state()?;
        let database = state.database(id)?;
        if database.refusing_state_tables {
            exn::bail!(ErrorKind::Rejected(format!("state table of {} unavailable", database.name)));
        }
        database.state_table_reads += 1;
        Ok(database.records.iter().map(|(index, record)| (*index, record.unique_id())).collect())
    }

    fn read_record(&mut self, id: DatabaseId, index: StateIndex) -> Result<Record> {
        let (record, hook, delay) = {
            let mut state = self.state()?;
            state.record_reads += 1;
            let record = state.database(id)?.records.get(&index).cloned();
            let record = record.ok_or_raise(|| ErrorKind::NoSuchRecord(index))?;
            (record, state.read_hook.clone(), state.read_delay)
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if let Some(hook) = hook {
            hook(record.unique_id());
        }
        Ok(record)
    }

    fn write_record(&mut self, id: DatabaseId, index: StateIndex, record: &Record) -> Result<()> {
        let mut state = self.state()?;
        let database = state.database(id)?;
        database.check_writable()?;
        let slot = database.records.get_mut(&index);
        let slot = slot.ok_or_raise(|| ErrorKind::NoSuchRecord(index))?;
        *slot = Record::new(database.name.clone(), record.unique_id(), record.record_type(), record.payload());
        state.mutated(id);
        Ok(())
    }

    fn add_record(&mut self, id: DatabaseId, record: &Record) -> Result<()> {
        let mut state = self.state()?;
        let database = state.database(id)?;
        database.check_writable()?;
        if database.failing_adds {
            exn::bail!(ErrorKind::Rejected(format!("add to {} refused", database.name)));
        }
        if database.records.values().any(|existing| existing.unique_id() == record.unique_id()) {
            exn::bail!(ErrorKind::Rejected(format!("duplicate unique ID {:08x}", record.unique_id())));
        }
        let index = database.next_index();
        let stored = Record::new(database.name.clone(), record.unique_id(), record.record_type(), record.payload());
        database.records.insert(index, stored);
        state.mutated(id);
        Ok(())
    }

    fn delete_record(&mut self, id: DatabaseId, index: StateIndex) -> Result<()> {
        let mut state = self.state()?;
        let database = state.database(id)?;
        database.check_writable()?;
        if database.records.remove(&index).is_none() {
            exn::bail!(ErrorKind::NoSuchRecord(index));
        }
        state.mutated(id);
        Ok(())
    }

    fn clear_database(&mut self, id: DatabaseId) -> Result<()> {
        let mut state = self.state()?;
        let database = state.database(id)?;
        database.check_writable()?;
        database.records.clear();
        Ok(())
    }
}

/// A bus with [`MockDevice`]s plugged into it.
///
/// Keeps one [`DeviceHandle`] per connected PIN, like a real bus would.
#[derive(Default)]
pub struct MockBus {
    devices: Mutex<Vec<(DeviceInfo, MockDevice)>>,
    connected: Mutex<HashMap<u32, DeviceHandle>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, info: DeviceInfo, device: MockDevice) -> Self {
        self.plug_in(info, device);
        self
    }

    pub fn plug_in(&self, info: DeviceInfo, device: MockDevice) {
        let mut devices = self.devices.lock();
        devices.retain(|(existing, _)| existing.pin != info.pin);
        devices.push((info, device));
    }

    /// Remove a device and forget its connection.
    pub fn unplug(&self, pin: u32) {
        self.devices.lock().retain(|(info, _)| info.pin != pin);
        self.connected.lock().remove(&pin);
    }
}

impl DeviceBus for MockBus {
    fn probe(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.lock().iter().map(|(info, _)| info.clone()).collect())
    }

    fn connect(&self, device: &DeviceInfo, password: Option<&str>) -> Result<DeviceHandle> {
        let mut connected = self.connected.lock();
        if let Some(handle) = connected.get(&device.pin) {
            return Ok(Arc::clone(handle));
        }
        let mock = {
            let devices = self.devices.lock();
            let found = devices.iter().find(|(info, _)| info.pin == device.pin);
            found.map(|(_, mock)| mock.clone()).ok_or_raise(|| ErrorKind::UnknownDevice(device.pin))?
        };
        let session = mock.open_session(password)?;
        let handle = Arc::new(ExclusiveDevice::new(device.clone(), Box::new(session)));
        connected.insert(device.pin, Arc::clone(&handle));
        Ok(handle)
    }
}
