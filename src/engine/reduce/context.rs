use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::warn;

use crate::engine::errors::RecordError;
use crate::shared::config::{CONFIG, ReduceConfig, Settings};

/// Per-query state shared by every stage call: settings, segment total,
/// output columns and the ordered list of non-fatal errors.
#[derive(Debug, Clone)]
pub struct QueryContext {
    settings: Arc<Settings>,
    total_segments: u64,
    errors: Vec<RecordError>,
    final_columns: IndexSet<String>,
}

impl QueryContext {
    pub fn new(total_segments: u64, settings: Arc<Settings>) -> Self {
        Self {
            settings,
            total_segments,
            errors: Vec::new(),
            final_columns: IndexSet::new(),
        }
    }

    /// Context backed by the process-wide configuration.
    pub fn from_global(total_segments: u64) -> Self {
        Self::new(total_segments, CONFIG.clone())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn reduce_config(&self) -> &ReduceConfig {
        &self.settings.reduce
    }

    pub fn total_segments(&self) -> u64 {
        self.total_segments
    }

    pub fn push_error(&mut self, err: RecordError) {
        warn!(target: "snel_reduce::context", stage = err.stage, error = %err, "Record skipped");
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[RecordError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<RecordError> {
        std::mem::take(&mut self.errors)
    }

    pub fn add_column(&mut self, name: &str) {
        if !self.final_columns.contains(name) {
            self.final_columns.insert(name.to_string());
        }
    }

    pub fn remove_column(&mut self, name: &str) {
        self.final_columns.shift_remove(name);
    }

    /// Drops every tracked column and starts over with `names`.
    pub fn replace_columns<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.final_columns = names.into_iter().map(Into::into).collect();
    }

    pub fn final_columns(&self) -> Vec<String> {
        self.final_columns.iter().cloned().collect()
    }
}

/// Counts finished segments for a barrier stage.
///
/// A barrier releases on the call that both finishes a segment and brings
/// the processed count up to the query's total.
#[derive(Debug, Default)]
pub struct SegmentBarrier {
    processed: Mutex<u64>,
}

impl SegmentBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one call; returns true when the barrier should release.
    pub fn arrive(&self, finishes_segment: bool, total_segments: u64) -> bool {
        if !finishes_segment {
            return false;
        }
        let mut processed = self.processed.lock();
        *processed += 1;
        *processed >= total_segments
    }

    pub fn processed(&self) -> u64 {
        *self.processed.lock()
    }
}
