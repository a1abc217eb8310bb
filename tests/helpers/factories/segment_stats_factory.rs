use serde_json::Value;

use crate::engine::reduce::stats::{FieldStats, SegmentStats};
use crate::engine::types::FieldValue;

/// Builds one segment's partial stats the way a scanner would.
pub struct SegmentStatsFactory {
    rows: Vec<Value>,
    keep_values: bool,
}

impl SegmentStatsFactory {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            keep_values: true,
        }
    }

    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Drops raw per-record values, leaving only the summary statistics.
    pub fn without_values(mut self) -> Self {
        self.keep_values = false;
        self
    }

    pub fn create(self) -> SegmentStats {
        let mut fields: Vec<String> = Vec::new();
        for row in &self.rows {
            if let Value::Object(map) = row {
                for key in map.keys() {
                    if !fields.contains(key) {
                        fields.push(key.clone());
                    }
                }
            }
        }

        let mut stats = SegmentStats::new(self.rows.len() as u64);
        for field in fields {
            let column: Vec<FieldValue> = self
                .rows
                .iter()
                .map(|row| row.get(&field).cloned().map(FieldValue::from).unwrap_or_default())
                .collect();
            let mut field_stats = FieldStats::from_values(&column);
            if !self.keep_values {
                field_stats = field_stats.without_values();
            }
            stats = stats.with_field(field, field_stats);
        }
        stats
    }

    /// Single-field segment from plain numbers.
    pub fn numbers(field: &str, values: &[f64]) -> SegmentStats {
        let column: Vec<FieldValue> = values.iter().map(|v| FieldValue::number(*v)).collect();
        SegmentStats::new(values.len() as u64).with_field(field, FieldStats::from_values(&column))
    }
}
