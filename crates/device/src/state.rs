use crate::StateIndex;
use std::collections::BTreeMap;

/// A database's `state index -> unique ID` table, as reported by the device.
///
/// State indexes are volatile; unique IDs are stable. The table also
/// allocates fresh unique IDs for records about to be added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateTable {
    entries: BTreeMap<StateIndex, u64>,
    last_new_id: u64,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(state index, unique ID)` pairs in state index order.
    pub fn iter(&self) -> impl Iterator<Item = (StateIndex, u64)> + '_ {
        self.entries.iter().map(|(index, id)| (*index, *id))
    }

    pub fn unique_id(&self, index: StateIndex) -> Option<u64> {
        self.entries.get(&index).copied()
    }

    /// Find the current state index of a record by its unique ID.
    pub fn index_of(&self, unique_id: u64) -> Option<StateIndex> {
        self.entries.iter().find(|(_, id)| **id == unique_id).map(|(index, _)| *index)
    }

    pub fn contains(&self, unique_id: u64) -> bool {
        self.index_of(unique_id).is_some()
    }

    /// Allocate a unique ID that no record in the table uses, and that
    /// this table has not handed out before.
    pub fn make_new_record_id(&mut self) -> u64 {
        loop {
            self.last_new_id = self.last_new_id.wrapping_add(1);
            if self.last_new_id != 0 && !self.entries.values().any(|id| *id == self.last_new_id) {
                return self.last_new_id;
            }
        }
    }

    /// Take the entries of a freshly fetched table, keeping this table's ID
    /// allocator position.
    pub fn refresh(&mut self, fresh: StateTable) {
        self.entries = fresh.entries;
    }
}

impl FromIterator<(StateIndex, u64)> for StateTable {
    fn from_iter<I: IntoIterator<Item = (StateIndex, u64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            last_new_id: 0,
        }
    }
}
