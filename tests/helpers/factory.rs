use std::sync::Arc;

pub use super::factories::{BucketFactory, RecordSetFactory, SegmentStatsFactory};

use crate::engine::reduce::context::QueryContext;
use crate::shared::config::Settings;

pub struct Factory;

impl Factory {
    pub fn records() -> RecordSetFactory {
        RecordSetFactory::new()
    }

    pub fn buckets() -> BucketFactory {
        BucketFactory::new()
    }

    pub fn segment_stats() -> SegmentStatsFactory {
        SegmentStatsFactory::new()
    }

    /// Context over default settings; never touches the global config.
    pub fn context(total_segments: u64) -> QueryContext {
        QueryContext::new(total_segments, Arc::new(Settings::default()))
    }

    pub fn context_with(total_segments: u64, settings: Settings) -> QueryContext {
        QueryContext::new(total_segments, Arc::new(settings))
    }
}
