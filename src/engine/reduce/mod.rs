pub mod bin;
pub mod bucket;
pub mod context;
pub mod dedup;
pub mod expr;
pub mod order;
pub mod pipeline;
pub mod record_set;
pub mod stats;
pub mod streamstats;
pub mod transaction;

pub use bucket::{Bucket, BucketedResult};
pub use context::{QueryContext, SegmentBarrier};
pub use pipeline::{Pipeline, SegmentBatch, Stage};
pub use record_set::{Record, RecordSet};
