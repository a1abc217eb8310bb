pub mod bucket_factory;
pub mod record_set_factory;
pub mod segment_stats_factory;
pub mod timestamp_factory;

pub use bucket_factory::BucketFactory;
pub use record_set_factory::RecordSetFactory;
pub use segment_stats_factory::SegmentStatsFactory;
pub use timestamp_factory::TimestampFactory;
