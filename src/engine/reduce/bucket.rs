use indexmap::IndexMap;

use crate::engine::errors::ReduceError;
use crate::engine::reduce::record_set::Record;
use crate::engine::types::FieldValue;

/// One group of a bucketed result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    /// One entry per group-by column, in `BucketedResult::group_by` order
    pub key: Vec<String>,
    pub stats: IndexMap<String, FieldValue>,
    /// Number of records folded into this bucket
    pub count: u64,
}

impl Bucket {
    pub fn new(key: Vec<String>, count: u64) -> Self {
        Self {
            key,
            stats: IndexMap::new(),
            count,
        }
    }

    pub fn with_stat(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.stats.insert(name.into(), value);
        self
    }
}

/// Grouped output: every bucket shares the same group-by columns and stat keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketedResult {
    pub group_by: Vec<String>,
    pub stat_keys: Vec<String>,
    pub buckets: Vec<Bucket>,
}

impl BucketedResult {
    pub fn new(group_by: Vec<String>, stat_keys: Vec<String>) -> Self {
        Self {
            group_by,
            stat_keys,
            buckets: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Appends a bucket after checking it carries exactly this result's columns.
    pub fn push(&mut self, bucket: Bucket) -> Result<(), ReduceError> {
        self.check_bucket(&bucket)?;
        self.buckets.push(bucket);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ReduceError> {
        self.buckets.iter().try_for_each(|b| self.check_bucket(b))
    }

    fn check_bucket(&self, bucket: &Bucket) -> Result<(), ReduceError> {
        if bucket.key.len() != self.group_by.len() {
            return Err(ReduceError::MalformedStage(format!(
                "bucket key {:?} does not match group-by columns {:?}",
                bucket.key, self.group_by
            )));
        }
        let same_stats = bucket.stats.len() == self.stat_keys.len()
            && self.stat_keys.iter().all(|k| bucket.stats.contains_key(k));
        if !same_stats {
            return Err(ReduceError::MalformedStage(format!(
                "bucket stats {:?} do not match stat keys {:?}",
                bucket.stats.keys().collect::<Vec<_>>(),
                self.stat_keys
            )));
        }
        Ok(())
    }

    /// Adds a stat column to every bucket, filling it with `Null`.
    pub fn ensure_stat_key(&mut self, name: &str) {
        if self.stat_keys.iter().any(|k| k == name) {
            return;
        }
        self.stat_keys.push(name.to_string());
        for bucket in &mut self.buckets {
            bucket.stats.entry(name.to_string()).or_insert(FieldValue::Null);
        }
    }

    /// Value of a group-by column or stat for one bucket.
    pub fn value_of(&self, bucket: &Bucket, name: &str) -> FieldValue {
        if let Some(idx) = self.group_by.iter().position(|g| g == name) {
            return bucket
                .key
                .get(idx)
                .map(|k| FieldValue::from(k.as_str()))
                .unwrap_or_default();
        }
        bucket.stats.get(name).cloned().unwrap_or_default()
    }

    /// Flattens a bucket into a record view: group-by columns first, then stats.
    pub fn row(&self, bucket: &Bucket) -> Record {
        let mut row = Record::with_capacity(self.group_by.len() + bucket.stats.len());
        for (name, key) in self.group_by.iter().zip(bucket.key.iter()) {
            row.insert(name.clone(), FieldValue::from(key.as_str()));
        }
        for (name, value) in &bucket.stats {
            row.insert(name.clone(), value.clone());
        }
        row
    }

    /// Blanks a column: group-by parts become "", stats become `Null`.
    pub fn blank(&self, bucket: &mut Bucket, name: &str) {
        if let Some(idx) = self.group_by.iter().position(|g| g == name) {
            if let Some(part) = bucket.key.get_mut(idx) {
                part.clear();
            }
        } else if let Some(value) = bucket.stats.get_mut(name) {
            *value = FieldValue::Null;
        }
    }
}
