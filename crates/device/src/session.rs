use crate::StateTable;
use crate::error::Result;
use handheld_record::{DatabaseDescriptor, Record};

/// Device-assigned database handle, valid for the lifetime of a session.
pub type DatabaseId = u32;
/// Volatile slot number addressing a record for write/delete. The device may
/// renumber after any mutation; the stable identity is the unique ID.
pub type StateIndex = u32;

/// One connection to a device, able to issue database commands.
///
/// Implementations are not expected to be thread-safe beyond `Send`: all
/// access goes through an [`ExclusiveDevice`](crate::ExclusiveDevice).
/// Every command may fail with a device error; failures caused by a
/// read-only database are reported as
/// [`ErrorKind::ReadOnly`](crate::error::ErrorKind::ReadOnly).
pub trait DeviceSession: Send {
    /// Open the session, authenticating with `password` if the device is
    /// locked.
    fn open(&mut self, password: Option<&str>) -> Result<()>;

    fn is_open(&self) -> bool;

    /// List the databases present on the device.
    fn catalog(&mut self) -> Result<Vec<DatabaseDescriptor>>;

    fn database_id(&mut self, name: &str) -> Result<DatabaseId>;

    /// Fetch the current `state index -> unique ID` table of a database.
    fn state_table(&mut self, id: DatabaseId) -> Result<StateTable>;

    fn read_record(&mut self, id: DatabaseId, index: StateIndex) -> Result<Record>;

    /// Replace the record currently at `index`.
    fn write_record(&mut self, id: DatabaseId, index: StateIndex, record: &Record) -> Result<()>;

    /// Add a new record; the device assigns its state index.
    fn add_record(&mut self, id: DatabaseId, record: &Record) -> Result<()>;

    fn delete_record(&mut self, id: DatabaseId, index: StateIndex) -> Result<()>;

    /// Remove every record from a database.
    fn clear_database(&mut self, id: DatabaseId) -> Result<()>;
}
