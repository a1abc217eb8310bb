pub mod accumulator;
pub mod combiner;
pub mod segment_stats;
pub mod spec;
pub mod stage;

pub use accumulator::{Accumulator, Extremum, Moments};
pub use combiner::{combine_record, combine_segment};
pub use segment_stats::{FieldStats, SegmentStats};
pub use spec::{AggFunc, AggSource, AggregateSpec};
pub use stage::StatsStage;

#[cfg(test)]
mod combiner_test;
#[cfg(test)]
mod spec_test;
#[cfg(test)]
mod stage_test;
