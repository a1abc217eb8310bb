use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::engine::errors::ReduceError;
use crate::engine::reduce::record_set::Record;
use crate::engine::types::FieldValue;

/// Precomputed statistics of one field over one segment, as produced by the scanner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldStats {
    /// Records where the field is present
    pub count: u64,
    /// Records where the field is numeric (by type or by parsing)
    pub num_count: u64,
    pub num_sum: f64,
    pub num_min: Option<f64>,
    pub num_max: Option<f64>,
    /// Extremes among the non-numeric values
    pub str_min: Option<String>,
    pub str_max: Option<String>,
    pub distinct: Option<BTreeSet<String>>,
    /// One entry per segment record (`Null` where absent), when row-level access is needed
    pub values: Option<Vec<FieldValue>>,
}

impl FieldStats {
    /// Computes every statistic, raw values included, from a segment's column.
    pub fn from_values(values: &[FieldValue]) -> Self {
        let mut stats = FieldStats {
            distinct: Some(BTreeSet::new()),
            values: Some(values.to_vec()),
            ..Default::default()
        };
        for value in values.iter().filter(|v| !v.is_null()) {
            stats.count += 1;
            let scalars: Vec<FieldValue> = match value {
                FieldValue::Utf8List(items) => {
                    items.iter().map(|s| FieldValue::from(s.as_str())).collect()
                }
                other => vec![other.clone()],
            };
            for scalar in scalars {
                if let Some(set) = stats.distinct.as_mut() {
                    set.insert(scalar.to_string_repr());
                }
                match scalar.as_f64() {
                    Some(n) => {
                        stats.num_count += 1;
                        stats.num_sum += n;
                        stats.num_min = Some(stats.num_min.map_or(n, |m| m.min(n)));
                        stats.num_max = Some(stats.num_max.map_or(n, |m| m.max(n)));
                    }
                    None => {
                        let s = scalar.to_string_repr();
                        if stats.str_min.as_ref().is_none_or(|m| s < *m) {
                            stats.str_min = Some(s.clone());
                        }
                        if stats.str_max.as_ref().is_none_or(|m| s > *m) {
                            stats.str_max = Some(s);
                        }
                    }
                }
            }
        }
        stats
    }

    /// Drops the raw per-record values, as scanners do when no expression needs them.
    pub fn without_values(mut self) -> Self {
        self.values = None;
        self
    }

    pub fn without_distinct(mut self) -> Self {
        self.distinct = None;
        self
    }
}

/// Partial statistics for one segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentStats {
    pub record_count: u64,
    pub fields: IndexMap<String, FieldStats>,
}

impl SegmentStats {
    pub fn new(record_count: u64) -> Self {
        Self {
            record_count,
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, stats: FieldStats) -> Self {
        self.fields.insert(name.into(), stats);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldStats> {
        self.fields.get(name)
    }

    /// Rebuilds per-record rows over `fields` from their raw values.
    pub fn rows(&self, agg: &str, fields: &[String]) -> Result<Vec<Record>, ReduceError> {
        let mut rows = vec![Record::new(); self.record_count as usize];
        for field in fields {
            let stats = self
                .field(field)
                .ok_or_else(|| ReduceError::MissingFieldStats {
                    agg: agg.to_string(),
                    field: field.clone(),
                })?;
            let values = stats
                .values
                .as_ref()
                .ok_or_else(|| ReduceError::MissingRawValues {
                    agg: agg.to_string(),
                    field: field.clone(),
                })?;
            if values.len() != rows.len() {
                return Err(ReduceError::MalformedStage(format!(
                    "field '{}' has {} raw values for {} records",
                    field,
                    values.len(),
                    rows.len()
                )));
            }
            for (row, value) in rows.iter_mut().zip(values) {
                if !value.is_null() {
                    row.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(rows)
    }
}
