use std::fmt;

use crate::engine::errors::{EvalError, ReduceError};
use crate::engine::types::FieldValue;
use crate::shared::datetime::time_bucketing::{
    CalendarTimeBucketer, MILLIS_PER_MONTH, MILLIS_PER_YEAR, TimeSpan, TimeUnit,
};

/// Width of one bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinSpan {
    /// Linear bins of this width
    Numeric(f64),
    /// Bin edges at `coefficient * base^k`
    Log { coefficient: f64, base: f64 },
    /// Calendar-aware time bins over epoch milliseconds
    Time(TimeSpan),
}

/// Granularities tried, finest first, when picking a time span automatically.
const AUTO_TIME_SPANS: [(u32, TimeUnit); 10] = [
    (1, TimeUnit::Second),
    (10, TimeUnit::Second),
    (30, TimeUnit::Second),
    (1, TimeUnit::Minute),
    (5, TimeUnit::Minute),
    (10, TimeUnit::Minute),
    (30, TimeUnit::Minute),
    (1, TimeUnit::Hour),
    (1, TimeUnit::Day),
    (1, TimeUnit::Month),
];

impl BinSpan {
    /// Parses `100`, `2.5`, `log`, `2log10`, `log2`, `30s`, `5m`, `1mon`, `3q`, ...
    pub fn parse(text: &str) -> Result<Self, ReduceError> {
        let text = text.trim();
        let malformed = || ReduceError::MalformedStage(format!("invalid bin span '{}'", text));

        if let Some(idx) = text.find("log") {
            let coefficient = match &text[..idx] {
                "" => 1.0,
                c => c.parse::<f64>().map_err(|_| malformed())?,
            };
            let base = match &text[idx + 3..] {
                "" => 10.0,
                b => b.parse::<f64>().map_err(|_| malformed())?,
            };
            let span = BinSpan::Log { coefficient, base };
            span.validate()?;
            return Ok(span);
        }

        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let value: f64 = number.parse().map_err(|_| malformed())?;

        let span = if unit.is_empty() {
            BinSpan::Numeric(value)
        } else {
            let unit = parse_time_unit(unit).ok_or_else(malformed)?;
            if value.fract() != 0.0 || value < 1.0 || value > u32::MAX as f64 {
                return Err(malformed());
            }
            BinSpan::Time(TimeSpan::new(value as u32, unit))
        };
        span.validate()?;
        Ok(span)
    }

    pub fn validate(&self) -> Result<(), ReduceError> {
        match self {
            BinSpan::Numeric(width) if !(width.is_finite() && *width > 0.0) => Err(
                ReduceError::MalformedStage(format!("bin span must be positive, got {}", width)),
            ),
            BinSpan::Log { coefficient, base }
                if !(*base > 1.0 && *coefficient >= 1.0 && coefficient < base) =>
            {
                Err(ReduceError::MalformedStage(format!(
                    "log span needs base > 1 and 1 <= coefficient < base, got {}log{}",
                    coefficient, base
                )))
            }
            BinSpan::Time(span) if span.checked_millis().is_none() => Err(
                ReduceError::MalformedStage(format!("time span {} is out of range", span)),
            ),
            _ => Ok(()),
        }
    }

    /// Start of the bin holding `value`.
    pub fn assign(
        &self,
        field: &str,
        value: &FieldValue,
        bucketer: &CalendarTimeBucketer,
        align_ms: Option<i64>,
    ) -> Result<FieldValue, EvalError> {
        let type_error = |expected: &'static str| EvalError::Type {
            field: field.to_string(),
            value: value.to_string_repr(),
            expected,
        };
        match self {
            BinSpan::Numeric(width) => {
                let v = value.as_f64().ok_or_else(|| type_error("numeric"))?;
                Ok(FieldValue::number(floor_to_span(v, *width)))
            }
            BinSpan::Log { coefficient, base } => {
                let v = value.as_f64().ok_or_else(|| type_error("numeric"))?;
                if v <= 0.0 {
                    return Err(type_error("positive"));
                }
                let mut k = (v / coefficient).log(*base).floor();
                // ln/ln can fall just short of an exact edge (log10(1000) = 2.999...)
                if coefficient * base.powf(k + 1.0) <= v {
                    k += 1.0;
                }
                Ok(FieldValue::number(coefficient * base.powf(k)))
            }
            BinSpan::Time(span) => {
                let ts = value.as_i64().ok_or_else(|| type_error("a timestamp"))?;
                bucketer
                    .bucket_of(ts, span, align_ms)
                    .map(FieldValue::Int64)
                    .ok_or_else(|| EvalError::Other(format!("timestamp {} is out of range", ts)))
            }
        }
    }
}

impl fmt::Display for BinSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinSpan::Numeric(width) => write!(f, "{}", width),
            BinSpan::Log { coefficient, base } => write!(f, "{}log{}", coefficient, base),
            BinSpan::Time(span) => write!(f, "{}", span),
        }
    }
}

fn parse_time_unit(unit: &str) -> Option<TimeUnit> {
    let unit = match unit.to_ascii_lowercase().as_str() {
        "ms" => TimeUnit::Millisecond,
        "s" | "sec" | "secs" | "second" | "seconds" => TimeUnit::Second,
        "m" | "min" | "mins" | "minute" | "minutes" => TimeUnit::Minute,
        "h" | "hr" | "hrs" | "hour" | "hours" => TimeUnit::Hour,
        "d" | "day" | "days" => TimeUnit::Day,
        "w" | "week" | "weeks" => TimeUnit::Week,
        "mon" | "month" | "months" => TimeUnit::Month,
        "q" | "qtr" | "qtrs" | "quarter" | "quarters" => TimeUnit::Quarter,
        "y" | "yr" | "yrs" | "year" | "years" => TimeUnit::Year,
        _ => return None,
    };
    Some(unit)
}

/// `floor(v / width) * width`, computed as a division when `width` is
/// `1/n` so that 0.1-style spans do not leak float noise.
fn floor_to_span(v: f64, width: f64) -> f64 {
    let k = (v / width).floor();
    let inverse = 1.0 / width;
    if width < 1.0 && (inverse - inverse.round()).abs() < 1e-9 {
        k / inverse.round()
    } else {
        k * width
    }
}

/// Smallest power-of-ten span that keeps `(max - min) / span <= max_bins`,
/// then widened until it reaches `min_span`.
pub fn auto_numeric_span(min: f64, max: f64, max_bins: u64, min_span: Option<f64>) -> f64 {
    let range = if (max - min).is_finite() { max - min } else { 0.0 };
    let bins = max_bins.max(1) as f64;
    let fits = |exp: i32| range / 10f64.powi(exp) <= bins;

    let mut exp = if range > 0.0 {
        (range / bins).log10().ceil() as i32
    } else {
        0
    };
    // log10 rounding can land one exponent off either way
    while !fits(exp) {
        exp += 1;
    }
    while range > 0.0 && fits(exp - 1) {
        exp -= 1;
    }
    if let Some(min_span) = min_span {
        while 10f64.powi(exp) < min_span {
            exp += 1;
        }
    }
    10f64.powi(exp)
}

/// Human-scale time span whose width covers `(max - min) / max_bins`.
pub fn auto_time_span(
    min_ms: i64,
    max_ms: i64,
    max_bins: u64,
    min_span: Option<TimeSpan>,
) -> TimeSpan {
    // In f64: the extent of arbitrary i64 timestamps can exceed i64::MAX
    let per_bin = (max_ms as f64 - min_ms as f64).max(0.0) / max_bins.max(1) as f64;

    let chosen = AUTO_TIME_SPANS
        .iter()
        .map(|(num, unit)| TimeSpan::new(*num, *unit))
        .find(|span| span.approx_millis() as f64 >= per_bin)
        .unwrap_or_else(|| {
            let months = (per_bin / MILLIS_PER_MONTH as f64).ceil() as u32;
            if months >= 12 {
                let years = (per_bin / MILLIS_PER_YEAR as f64).ceil() as u32;
                TimeSpan::new(years, TimeUnit::Year)
            } else {
                TimeSpan::new(months, TimeUnit::Month)
            }
        });

    match min_span {
        Some(min) if chosen.approx_millis() < min.approx_millis() => min,
        _ => chosen,
    }
}
