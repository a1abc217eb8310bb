pub mod time;
pub mod time_bucketing;
