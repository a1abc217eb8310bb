use super::time::TimeConfig;
use chrono::{DateTime, Datelike, LocalResult, Months, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;
pub const MILLIS_PER_WEEK: i64 = 7 * MILLIS_PER_DAY;
// Fixed-width approximations, used only by naive bucketing and span estimation
pub const MILLIS_PER_MONTH: i64 = 30 * MILLIS_PER_DAY;
pub const MILLIS_PER_QUARTER: i64 = 3 * MILLIS_PER_MONTH;
pub const MILLIS_PER_YEAR: i64 = 365 * MILLIS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeUnit {
    /// Approximate width of one unit in milliseconds
    pub fn approx_millis(&self) -> i64 {
        match self {
            TimeUnit::Millisecond => 1,
            TimeUnit::Second => MILLIS_PER_SECOND,
            TimeUnit::Minute => MILLIS_PER_MINUTE,
            TimeUnit::Hour => MILLIS_PER_HOUR,
            TimeUnit::Day => MILLIS_PER_DAY,
            TimeUnit::Week => MILLIS_PER_WEEK,
            TimeUnit::Month => MILLIS_PER_MONTH,
            TimeUnit::Quarter => MILLIS_PER_QUARTER,
            TimeUnit::Year => MILLIS_PER_YEAR,
        }
    }

    /// Units that are a fixed number of milliseconds regardless of calendar
    pub fn is_sub_day(&self) -> bool {
        matches!(
            self,
            TimeUnit::Millisecond | TimeUnit::Second | TimeUnit::Minute | TimeUnit::Hour
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Millisecond => "ms",
            TimeUnit::Second => "s",
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
            TimeUnit::Week => "w",
            TimeUnit::Month => "mon",
            TimeUnit::Quarter => "q",
            TimeUnit::Year => "y",
        }
    }
}

/// A span of `num` time units, e.g. 5m or 3mon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeSpan {
    pub num: u32,
    pub unit: TimeUnit,
}

impl TimeSpan {
    pub fn new(num: u32, unit: TimeUnit) -> Self {
        Self {
            num: num.max(1),
            unit,
        }
    }

    /// Saturates at `i64::MAX` for spans wider than the timestamp range
    pub fn approx_millis(&self) -> i64 {
        (self.num as i64).saturating_mul(self.unit.approx_millis())
    }

    /// `None` when the span does not fit in an epoch-millisecond offset
    pub fn checked_millis(&self) -> Option<i64> {
        (self.num as i64).checked_mul(self.unit.approx_millis())
    }
}

impl std::fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.num, self.unit.as_str())
    }
}

/// Calendar-aware time bucketing over epoch-millisecond timestamps
#[derive(Debug, Clone)]
pub struct CalendarTimeBucketer {
    config: TimeConfig,
    tz: Tz,
}

impl CalendarTimeBucketer {
    pub fn new(config: TimeConfig) -> Self {
        let tz = config.tz();
        Self { config, tz }
    }

    /// Start of the bucket containing `ts_ms`.
    ///
    /// `align_ms` shifts sub-day buckets to start at that epoch offset instead
    /// of at the unix epoch; it is ignored for day and coarser units.
    /// Returns `None` when the timestamp cannot be represented as a date.
    pub fn bucket_of(&self, ts_ms: i64, span: &TimeSpan, align_ms: Option<i64>) -> Option<i64> {
        if span.unit.is_sub_day() {
            return floor_to_width(ts_ms, align_ms.unwrap_or(0), span.approx_millis());
        }

        if !self.config.use_calendar_bucketing {
            return naive_bucket_of(ts_ms, span);
        }

        let dt = DateTime::<Utc>::from_timestamp_millis(ts_ms)?.with_timezone(&self.tz);
        let date = dt.date_naive();
        let n = span.num as i64;

        let bucket_date = match span.unit {
            TimeUnit::Day => {
                let days = days_since_epoch(date);
                epoch_date().checked_add_signed(chrono::Duration::days(days.div_euclid(n) * n))?
            }
            TimeUnit::Week => {
                let offset = (date.weekday().num_days_from_monday() as i64
                    - self.config.week_start.num_days_from_monday() as i64)
                    .rem_euclid(7);
                let week_start = date - chrono::Duration::days(offset);
                let anchor = first_week_start(self.config.week_start);
                let weeks = (week_start - anchor).num_days().div_euclid(7);
                anchor.checked_add_signed(chrono::Duration::days(weeks.div_euclid(n) * n * 7))?
            }
            TimeUnit::Month => month_floor(date, n)?,
            TimeUnit::Quarter => month_floor(date, n * 3)?,
            TimeUnit::Year => {
                let year = 1970 + ((date.year() as i64 - 1970).div_euclid(n) * n);
                NaiveDate::from_ymd_opt(year as i32, 1, 1)?
            }
            TimeUnit::Millisecond | TimeUnit::Second | TimeUnit::Minute | TimeUnit::Hour => {
                return naive_bucket_of(ts_ms, span);
            }
        };

        self.start_of_local_day(bucket_date)
    }

    /// `ts_ms` moved by one span, backwards or forwards.
    ///
    /// Months, quarters and years move on the local calendar; shorter units
    /// move by their fixed width.
    pub fn shift(&self, ts_ms: i64, span: &TimeSpan, backwards: bool) -> Option<i64> {
        let months = match span.unit {
            TimeUnit::Month => span.num,
            TimeUnit::Quarter => span.num.checked_mul(3)?,
            TimeUnit::Year => span.num.checked_mul(12)?,
            _ => {
                let width = span.checked_millis()?;
                return if backwards {
                    ts_ms.checked_sub(width)
                } else {
                    ts_ms.checked_add(width)
                };
            }
        };
        let dt = DateTime::<Utc>::from_timestamp_millis(ts_ms)?.with_timezone(&self.tz);
        let months = Months::new(months);
        let moved = if backwards {
            dt.checked_sub_months(months)?
        } else {
            dt.checked_add_months(months)?
        };
        Some(moved.timestamp_millis())
    }

    fn start_of_local_day(&self, date: NaiveDate) -> Option<i64> {
        let naive = date.and_hms_opt(0, 0, 0)?;
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt.timestamp_millis()),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp_millis()),
            // Midnight skipped by a DST jump; use the UTC instant of that wall time
            LocalResult::None => Some(naive.and_utc().timestamp_millis()),
        }
    }
}

fn epoch_date() -> NaiveDate {
    // 1970-01-01
    NaiveDate::default()
}

fn days_since_epoch(date: NaiveDate) -> i64 {
    (date - epoch_date()).num_days()
}

/// Latest date on or before 1970-01-01 that falls on `week_start`
fn first_week_start(week_start: chrono::Weekday) -> NaiveDate {
    let epoch = epoch_date();
    let back = (epoch.weekday().num_days_from_monday() as i64
        - week_start.num_days_from_monday() as i64)
        .rem_euclid(7);
    epoch - chrono::Duration::days(back)
}

fn month_floor(date: NaiveDate, months: i64) -> Option<NaiveDate> {
    let since = (date.year() as i64 - 1970) * 12 + date.month0() as i64;
    let floored = since.div_euclid(months) * months;
    let year = 1970 + floored.div_euclid(12);
    let month = floored.rem_euclid(12) + 1;
    NaiveDate::from_ymd_opt(year as i32, month as u32, 1)
}

/// Fixed-width bucketing anchored at the unix epoch
pub fn naive_bucket_of(ts_ms: i64, span: &TimeSpan) -> Option<i64> {
    floor_to_width(ts_ms, 0, span.approx_millis())
}

/// `origin + floor((ts - origin) / width) * width`, or `None` past the i64 range.
fn floor_to_width(ts_ms: i64, origin: i64, width: i64) -> Option<i64> {
    let (ts, origin, width) = (ts_ms as i128, origin as i128, width as i128);
    i64::try_from(origin + (ts - origin).div_euclid(width) * width).ok()
}
