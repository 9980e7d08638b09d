use std::fmt::{Display, Formatter, Result as FmtResult};

/// One database entry, as an opaque addressable blob.
///
/// Identity is `(database, unique_id)`. The record type and payload are
/// never interpreted by the pipeline. Records are immutable: an edit
/// produces a new record (see [`with_payload`](Self::with_payload)) that
/// replaces the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    database: String,
    unique_id: u64,
    record_type: u8,
    payload: Vec<u8>,
}

impl Record {
    pub fn new(database: impl Into<String>, unique_id: u64, record_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            database: database.into(),
            unique_id,
            record_type,
            payload: payload.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn record_type(&self) -> u8 {
        self.record_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Same record under a different unique ID (used when the device hands
    /// out a fresh ID for an added record).
    #[must_use]
    pub fn with_unique_id(self, unique_id: u64) -> Self {
        Self { unique_id, ..self }
    }

    /// Replacement record carrying new content under the same identity.
    #[must_use]
    pub fn with_payload(self, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..self
        }
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{:08x} ({} bytes)", self.database, self.unique_id, self.payload.len())
    }
}

/// A catalog entry returned by a device probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseDescriptor {
    pub name: String,
    pub record_count: u32,
}

impl DatabaseDescriptor {
    pub fn new(name: impl Into<String>, record_count: u32) -> Self {
        Self { name: name.into(), record_count }
    }
}
