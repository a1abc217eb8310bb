use serde_json::Value;

use crate::engine::reduce::bucket::{Bucket, BucketedResult};
use crate::engine::types::FieldValue;

/// Builds a bucketed result; stat keys come from the first bucket's stats.
pub struct BucketFactory {
    group_by: Vec<String>,
    buckets: Vec<Bucket>,
}

impl BucketFactory {
    pub fn new() -> Self {
        Self {
            group_by: Vec::new(),
            buckets: Vec::new(),
        }
    }

    pub fn with_group_by(mut self, columns: &[&str]) -> Self {
        self.group_by = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// `stats` is a JSON object of stat key to value
    pub fn with_bucket(mut self, key: &[&str], stats: Value, count: u64) -> Self {
        let mut bucket = Bucket::new(key.iter().map(|k| k.to_string()).collect(), count);
        if let Value::Object(map) = stats {
            for (name, value) in map {
                bucket.stats.insert(name, FieldValue::from(value));
            }
        }
        self.buckets.push(bucket);
        self
    }

    pub fn create(self) -> BucketedResult {
        let stat_keys = self
            .buckets
            .first()
            .map(|b| b.stats.keys().cloned().collect())
            .unwrap_or_default();
        let mut result = BucketedResult::new(self.group_by, stat_keys);
        for bucket in self.buckets {
            result.push(bucket).unwrap();
        }
        result
    }
}
