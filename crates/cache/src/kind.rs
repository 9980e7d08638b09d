use std::fmt::{Display, Formatter, Result as FmtResult};

/// What a database's records support, decided by the database name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseKind {
    /// Records can be overwritten in place.
    Standard,
    /// Task records cannot be overwritten; an edit is a delete and re-add.
    Tasks,
}

impl DatabaseKind {
    pub fn for_database(name: &str) -> Self {
        match name {
            "Tasks" => DatabaseKind::Tasks,
            _ => DatabaseKind::Standard,
        }
    }

    pub fn supports_in_place_overwrite(&self) -> bool {
        !matches!(self, DatabaseKind::Tasks)
    }
}

impl Display for DatabaseKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            DatabaseKind::Standard => "standard",
            DatabaseKind::Tasks => "tasks",
        })
    }
}
