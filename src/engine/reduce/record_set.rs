use std::collections::HashMap;

use indexmap::IndexMap;

use crate::engine::errors::ReduceError;
use crate::engine::types::FieldValue;

/// One record: field name to value, in first-write order.
pub type Record = IndexMap<String, FieldValue>;

/// Records of one segment keyed by an opaque id, plus each record's output position.
///
/// Position, not map order, decides stream order. Every id must have a
/// position before an ordering-dependent stage reads the set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: HashMap<String, Record>,
    positions: HashMap<String, usize>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set whose positions follow the iterator order. Repeated ids
    /// are kept apart with `insert_unique`.
    pub fn from_ordered<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (String, Record)>,
    {
        let mut set = Self::new();
        for (position, (id, record)) in rows.into_iter().enumerate() {
            set.insert_unique(&id, record, position);
        }
        set
    }

    pub fn insert(&mut self, id: impl Into<String>, record: Record, position: usize) {
        let id = id.into();
        self.positions.insert(id.clone(), position);
        self.records.insert(id, record);
    }

    /// Inserts under `id`, suffixing it with `#n` if the id is already taken.
    /// Barrier stages merge segments whose ids are only unique per segment.
    pub fn insert_unique(&mut self, id: &str, record: Record, position: usize) -> String {
        let mut candidate = id.to_string();
        let mut n = 1;
        while self.records.contains_key(&candidate) {
            candidate = format!("{}#{}", id, n);
            n += 1;
        }
        self.insert(candidate.clone(), record, position);
        candidate
    }

    /// Inserts a record without assigning it a position.
    pub fn insert_unpositioned(&mut self, id: impl Into<String>, record: Record) {
        self.records.insert(id.into(), record);
    }

    pub fn set_position(&mut self, id: &str, position: usize) {
        self.positions.insert(id.to_string(), position);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.records.get_mut(id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn remove(&mut self, id: &str) -> Option<Record> {
        self.positions.remove(id);
        self.records.remove(id)
    }

    /// Ids sorted by output position (ties broken by id).
    pub fn ordered_ids(&self) -> Result<Vec<String>, ReduceError> {
        let mut keyed = Vec::with_capacity(self.records.len());
        for id in self.records.keys() {
            let position = self
                .positions
                .get(id)
                .copied()
                .ok_or_else(|| ReduceError::MissingPosition(id.clone()))?;
            keyed.push((position, id.clone()));
        }
        keyed.sort();
        Ok(keyed.into_iter().map(|(_, id)| id).collect())
    }

    /// Consumes the set, yielding records in output position order.
    pub fn into_ordered(mut self) -> Result<Vec<(String, Record)>, ReduceError> {
        let ids = self.ordered_ids()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.records.remove(&id) {
                out.push((id, record));
            }
        }
        Ok(out)
    }
}
