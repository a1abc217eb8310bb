use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use ahash::RandomState;
use serde_json::Value as JsonValue;

use crate::engine::errors::ReduceError;
use crate::engine::reduce::order::sort_key::{SortElement, SortKey, compare_keys};
use crate::engine::types::FieldValue;
use crate::shared::config::ReduceConfig;

/// What happens once a combination already holds `limit` rows.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupPolicy {
    /// Later rows are dropped
    KeepFirst,
    /// A strictly better-ranked row replaces the worst kept one
    KeepBest(Vec<SortElement>),
}

impl DedupPolicy {
    pub fn sort_elements(&self) -> &[SortElement] {
        match self {
            DedupPolicy::KeepFirst => &[],
            DedupPolicy::KeepBest(elements) => elements,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupOptions {
    pub fields: Vec<String>,
    /// Rows kept per distinct combination
    pub limit: usize,
    /// Rows with an absent dedup field are kept (otherwise dropped)
    pub keep_empty: bool,
    /// Only drop a row that repeats the immediately previous combination
    pub consecutive: bool,
    /// Dropped rows stay in the output with their dedup fields blanked
    pub keep_events: bool,
    pub policy: DedupPolicy,
}

impl DedupOptions {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            limit: 1,
            keep_empty: false,
            consecutive: false,
            keep_events: false,
            policy: DedupPolicy::KeepFirst,
        }
    }

    pub fn from_config(fields: Vec<String>, config: &ReduceConfig) -> Self {
        Self {
            limit: config.dedup_default_limit,
            ..Self::new(fields)
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn keep_empty(mut self) -> Self {
        self.keep_empty = true;
        self
    }

    pub fn consecutive(mut self) -> Self {
        self.consecutive = true;
        self
    }

    pub fn keep_events(mut self) -> Self {
        self.keep_events = true;
        self
    }

    pub fn sorted_by(mut self, elements: Vec<SortElement>) -> Self {
        self.policy = DedupPolicy::KeepBest(elements);
        self
    }

    pub fn validate(&self) -> Result<(), ReduceError> {
        if self.fields.is_empty() {
            return Err(ReduceError::MalformedStage(
                "dedup needs at least one field".to_string(),
            ));
        }
        if self.limit == 0 {
            return Err(ReduceError::MalformedStage(
                "dedup limit must be positive".to_string(),
            ));
        }
        if let DedupPolicy::KeepBest(elements) = &self.policy {
            if elements.is_empty() {
                return Err(ReduceError::MalformedStage(
                    "dedup sortby needs at least one field".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of offering one row to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupDecision {
    pub keep: bool,
    /// Sequence index of a previously kept row that must now go
    pub evict: Option<u64>,
}

impl DedupDecision {
    fn keep() -> Self {
        Self {
            keep: true,
            evict: None,
        }
    }

    fn discard() -> Self {
        Self {
            keep: false,
            evict: None,
        }
    }
}

/// Rows kept so far per combination key, with their sort keys.
///
/// No combination ever holds more than the configured limit.
#[derive(Debug, Default)]
pub struct CombinationTable {
    combinations: HashMap<String, BTreeMap<u64, Vec<SortKey>>, RandomState>,
    prev: Option<String>,
}

impl CombinationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON array of the field values; `None` when any value is absent.
    pub fn combination_key(
        values: &[Option<&FieldValue>],
    ) -> Result<Option<String>, ReduceError> {
        let mut parts = Vec::with_capacity(values.len());
        for value in values {
            match value {
                None | Some(FieldValue::Null) => return Ok(None),
                Some(v) => parts.push(v.to_json()),
            }
        }
        Ok(Some(serde_json::to_string(&JsonValue::Array(parts))?))
    }

    /// Decides whether the row at `seq` survives and which kept row, if any, it displaces.
    pub fn passes(
        &mut self,
        options: &DedupOptions,
        values: &[Option<&FieldValue>],
        seq: u64,
        sort_keys: Vec<SortKey>,
    ) -> Result<DedupDecision, ReduceError> {
        let Some(combination) = Self::combination_key(values)? else {
            return Ok(if options.keep_empty {
                DedupDecision::keep()
            } else {
                DedupDecision::discard()
            });
        };

        if options.consecutive {
            let repeated = self.prev.as_deref() == Some(combination.as_str());
            self.prev = Some(combination);
            return Ok(if repeated {
                DedupDecision::discard()
            } else {
                DedupDecision::keep()
            });
        }

        let kept = self.combinations.entry(combination).or_default();
        if kept.len() < options.limit {
            kept.insert(seq, sort_keys);
            return Ok(DedupDecision::keep());
        }

        let elements = match &options.policy {
            DedupPolicy::KeepFirst => return Ok(DedupDecision::discard()),
            DedupPolicy::KeepBest(elements) => elements,
        };

        // Worst kept row; among equal keys the later arrival is worse
        let worst = kept.iter().max_by(|(seq_a, keys_a), (seq_b, keys_b)| {
            compare_keys(keys_a, keys_b, elements).then(seq_a.cmp(seq_b))
        });
        let Some((&worst_seq, worst_keys)) = worst else {
            return Ok(DedupDecision::discard());
        };
        if compare_keys(&sort_keys, worst_keys, elements) != Ordering::Less {
            return Ok(DedupDecision::discard());
        }
        kept.remove(&worst_seq);
        kept.insert(seq, sort_keys);
        Ok(DedupDecision {
            keep: true,
            evict: Some(worst_seq),
        })
    }

    pub fn combinations(&self) -> usize {
        self.combinations.len()
    }

    /// Rows currently held for one combination key.
    pub fn kept_for(&self, combination: &str) -> usize {
        self.combinations.get(combination).map_or(0, BTreeMap::len)
    }
}
