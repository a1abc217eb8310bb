use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Calendar rules for time bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// IANA zone name; unset or unknown means UTC
    pub timezone: Option<String>,
    pub week_start: Weekday,
    /// Day and longer spans follow the calendar; when off every unit is a fixed width
    pub use_calendar_bucketing: bool,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            timezone: None,
            week_start: Weekday::Mon,
            use_calendar_bucketing: true,
        }
    }
}

impl TimeConfig {
    pub fn tz(&self) -> Tz {
        self.timezone
            .as_deref()
            .and_then(|name| name.parse().ok())
            .unwrap_or(Tz::UTC)
    }
}
