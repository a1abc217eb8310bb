use serde_json::Value;

use crate::engine::reduce::record_set::{Record, RecordSet};
use crate::engine::types::FieldValue;

/// Builds record sets from JSON objects; ids are `<prefix>-<n>` and positions
/// follow insertion order.
pub struct RecordSetFactory {
    prefix: String,
    rows: Vec<Record>,
}

impl RecordSetFactory {
    pub fn new() -> Self {
        Self {
            prefix: "rec".into(),
            rows: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_row(mut self, row: Value) -> Self {
        self.rows.push(Self::record(row));
        self
    }

    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows.extend(rows.into_iter().map(Self::record));
        self
    }

    /// One numeric field per row
    pub fn with_numbers(mut self, field: &str, values: &[f64]) -> Self {
        for v in values {
            let mut record = Record::new();
            record.insert(field.to_string(), FieldValue::number(*v));
            self.rows.push(record);
        }
        self
    }

    pub fn create(self) -> RecordSet {
        let prefix = self.prefix;
        RecordSet::from_ordered(
            self.rows
                .into_iter()
                .enumerate()
                .map(|(i, r)| (format!("{}-{}", prefix, i), r)),
        )
    }

    /// Splits the rows into consecutive segments of the given sizes.
    /// Ids stay unique across segments; positions restart in each segment.
    pub fn create_segments(self, sizes: &[usize]) -> Vec<RecordSet> {
        let mut rows = self.rows.into_iter().enumerate();
        let mut segments = Vec::with_capacity(sizes.len());
        for size in sizes {
            let chunk: Vec<(String, Record)> = rows
                .by_ref()
                .take(*size)
                .map(|(i, r)| (format!("{}-{}", self.prefix, i), r))
                .collect();
            segments.push(RecordSet::from_ordered(chunk));
        }
        segments
    }

    /// Converts a JSON object into a record, keeping key order.
    pub fn record(row: Value) -> Record {
        match row {
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (k, FieldValue::from(v)))
                .collect(),
            other => panic!("record rows must be JSON objects, got {}", other),
        }
    }
}
