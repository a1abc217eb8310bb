use chrono::{TimeZone, Utc};

/// Epoch-millisecond timestamps for known UTC dates
pub struct TimestampFactory;

impl TimestampFactory {
    pub fn utc_millis(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> i64 {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .unwrap()
            .timestamp_millis()
    }

    pub fn utc_date_millis(year: i32, month: u32, day: u32) -> i64 {
        Self::utc_millis(year, month, day, 0, 0, 0)
    }

    /// `base` shifted by whole seconds
    pub fn plus_seconds(base: i64, seconds: i64) -> i64 {
        base + seconds * 1_000
    }
}
