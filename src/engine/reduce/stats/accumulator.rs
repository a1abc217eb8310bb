use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::engine::errors::ReduceError;
use crate::engine::reduce::stats::segment_stats::FieldStats;
use crate::engine::reduce::stats::spec::{AggFunc, AggSource, AggregateSpec};
use crate::engine::types::FieldValue;

/// Running min or max. A numeric value always wins over a string; a string
/// only seeds the extremum while no number has been seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extremum {
    num: Option<f64>,
    text: Option<String>,
}

impl Extremum {
    pub fn new(num: Option<f64>, text: Option<String>) -> Self {
        Self { num, text }
    }

    /// `want` is `Less` for a minimum, `Greater` for a maximum.
    pub fn offer(&mut self, value: &FieldValue, want: Ordering) {
        match value {
            FieldValue::Null => {}
            FieldValue::Utf8List(items) => {
                for item in items {
                    self.offer(&FieldValue::from(item.as_str()), want);
                }
            }
            other => match other.as_f64() {
                Some(n) => self.offer_num(n, want),
                None => self.offer_text(&other.to_string_repr(), want),
            },
        }
    }

    fn offer_num(&mut self, v: f64, want: Ordering) {
        match self.num {
            Some(cur) if v.partial_cmp(&cur) == Some(want) => self.num = Some(v),
            None if !v.is_nan() => self.num = Some(v),
            _ => {}
        }
    }

    fn offer_text(&mut self, s: &str, want: Ordering) {
        if self.num.is_some() {
            return;
        }
        match &self.text {
            Some(cur) if s.cmp(cur.as_str()) == want => self.text = Some(s.to_string()),
            None => self.text = Some(s.to_string()),
            _ => {}
        }
    }

    pub fn merge(&mut self, other: &Extremum, want: Ordering) {
        if let Some(n) = other.num {
            self.offer_num(n, want);
        }
        if let Some(t) = &other.text {
            self.offer_text(t, want);
        }
    }

    pub fn finalize(&self) -> FieldValue {
        match (&self.num, &self.text) {
            (Some(n), _) => FieldValue::number(*n),
            (None, Some(t)) => FieldValue::Utf8(t.clone()),
            (None, None) => FieldValue::Null,
        }
    }
}

/// Count, mean and sum of squared deviations of a numeric sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
}

impl Moments {
    /// Two passes over the batch: mean first, then squared deviations from it.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let m2 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
        Self {
            count: values.len() as u64,
            mean,
            m2,
        }
    }

    /// Pairwise combination of two independent batches.
    pub fn merge(&mut self, other: &Moments) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count += other.count;
    }

    /// Variance with divisor `n - 1` (sample) or `n` (population).
    pub fn variance(&self, sample: bool) -> Option<f64> {
        let divisor = if sample {
            self.count.checked_sub(1)?
        } else {
            self.count
        };
        if divisor == 0 {
            return None;
        }
        Some(self.m2 / divisor as f64)
    }
}

/// Running state of one aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Count(u64),
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Min(Extremum),
    Max(Extremum),
    Range(Option<(f64, f64)>),
    /// `pending` holds the current batch until it is folded by `flush`
    Deviation { moments: Moments, pending: Vec<f64> },
    Distinct(BTreeSet<String>),
    List(Vec<String>),
}

impl Accumulator {
    pub fn for_func(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::Sum => Accumulator::Sum(0.0),
            AggFunc::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggFunc::Min => Accumulator::Min(Extremum::default()),
            AggFunc::Max => Accumulator::Max(Extremum::default()),
            AggFunc::Range => Accumulator::Range(None),
            AggFunc::Stdev | AggFunc::Stdevp => Accumulator::Deviation {
                moments: Moments::default(),
                pending: Vec::new(),
            },
            AggFunc::Cardinality | AggFunc::Values => Accumulator::Distinct(BTreeSet::new()),
            AggFunc::List => Accumulator::List(Vec::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Accumulator::Count(_) => "count",
            Accumulator::Sum(_) => "sum",
            Accumulator::Avg { .. } => "avg",
            Accumulator::Min(_) => "min",
            Accumulator::Max(_) => "max",
            Accumulator::Range(_) => "range",
            Accumulator::Deviation { .. } => "deviation",
            Accumulator::Distinct(_) => "distinct",
            Accumulator::List(_) => "list",
        }
    }

    fn expected_kind(func: AggFunc) -> &'static str {
        Accumulator::for_func(func).kind()
    }

    fn mismatch(&self, spec: &AggregateSpec) -> ReduceError {
        ReduceError::AccumulatorMismatch {
            key: spec.key.clone(),
            expected: Self::expected_kind(spec.func),
        }
    }

    fn check(&self, spec: &AggregateSpec) -> Result<(), ReduceError> {
        if self.kind() == Self::expected_kind(spec.func) {
            Ok(())
        } else {
            Err(self.mismatch(spec))
        }
    }

    /// Folds one record's evaluated value into the running state.
    ///
    /// Non-numeric values are skipped by the numeric aggregators. For `count`
    /// over a predicate the value is the 0/1 outcome and is added as is.
    pub fn combine(&mut self, spec: &AggregateSpec, value: &FieldValue) -> Result<(), ReduceError> {
        self.check(spec)?;
        if value.is_null() {
            return Ok(());
        }
        if let Accumulator::Count(c) = self {
            *c += match spec.source {
                AggSource::Predicate(_) => value.as_u64().unwrap_or(0),
                _ => 1,
            };
            return Ok(());
        }
        if let FieldValue::Utf8List(items) = value {
            for item in items {
                self.combine_scalar(&FieldValue::from(item.as_str()));
            }
        } else {
            self.combine_scalar(value);
        }
        Ok(())
    }

    fn combine_scalar(&mut self, value: &FieldValue) {
        match self {
            Accumulator::Count(c) => *c += 1,
            Accumulator::Sum(sum) => {
                if let Some(n) = value.as_f64() {
                    *sum += n;
                }
            }
            Accumulator::Avg { sum, count } => {
                if let Some(n) = value.as_f64() {
                    *sum += n;
                    *count += 1;
                }
            }
            Accumulator::Min(e) => e.offer(value, Ordering::Less),
            Accumulator::Max(e) => e.offer(value, Ordering::Greater),
            Accumulator::Range(range) => {
                if let Some(n) = value.as_f64() {
                    *range = Some(match *range {
                        Some((lo, hi)) => (lo.min(n), hi.max(n)),
                        None => (n, n),
                    });
                }
            }
            Accumulator::Deviation { pending, .. } => {
                if let Some(n) = value.as_f64() {
                    pending.push(n);
                }
            }
            Accumulator::Distinct(set) => {
                set.insert(value.to_string_repr());
            }
            Accumulator::List(items) => items.push(value.to_string_repr()),
        }
    }

    /// Adds `n` records to a count.
    pub fn add_count(&mut self, spec: &AggregateSpec, n: u64) -> Result<(), ReduceError> {
        match self {
            Accumulator::Count(c) => {
                *c += n;
                Ok(())
            }
            _ => Err(self.mismatch(spec)),
        }
    }

    /// Folds one segment's precomputed statistics for a plain field.
    pub fn absorb_field_stats(
        &mut self,
        spec: &AggregateSpec,
        field: &str,
        stats: &FieldStats,
    ) -> Result<(), ReduceError> {
        self.check(spec)?;
        let missing_raw = || ReduceError::MissingRawValues {
            agg: spec.key.clone(),
            field: field.to_string(),
        };
        match self {
            Accumulator::Count(c) => *c += stats.count,
            Accumulator::Sum(sum) => *sum += stats.num_sum,
            Accumulator::Avg { sum, count } => {
                *sum += stats.num_sum;
                *count += stats.num_count;
            }
            Accumulator::Min(e) => e.merge(
                &Extremum::new(stats.num_min, stats.str_min.clone()),
                Ordering::Less,
            ),
            Accumulator::Max(e) => e.merge(
                &Extremum::new(stats.num_max, stats.str_max.clone()),
                Ordering::Greater,
            ),
            Accumulator::Range(range) => {
                if let (Some(lo), Some(hi)) = (stats.num_min, stats.num_max) {
                    *range = Some(match *range {
                        Some((a, b)) => (a.min(lo), b.max(hi)),
                        None => (lo, hi),
                    });
                }
            }
            Accumulator::Deviation { moments, .. } => {
                let values = stats.values.as_ref().ok_or_else(missing_raw)?;
                let numeric: Vec<f64> = values.iter().filter_map(FieldValue::as_f64).collect();
                moments.merge(&Moments::from_values(&numeric));
            }
            Accumulator::Distinct(set) => match (&stats.distinct, &stats.values) {
                (Some(distinct), _) => set.extend(distinct.iter().cloned()),
                (None, Some(values)) => {
                    for v in values.iter().filter(|v| !v.is_null()) {
                        match v {
                            FieldValue::Utf8List(items) => set.extend(items.iter().cloned()),
                            other => {
                                set.insert(other.to_string_repr());
                            }
                        }
                    }
                }
                (None, None) => return Err(missing_raw()),
            },
            Accumulator::List(items) => {
                let values = stats.values.as_ref().ok_or_else(missing_raw)?;
                for v in values.iter().filter(|v| !v.is_null()) {
                    match v {
                        FieldValue::Utf8List(list) => items.extend(list.iter().cloned()),
                        other => items.push(other.to_string_repr()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Folds the values buffered since the last flush into the moments.
    pub fn flush(&mut self) {
        if let Accumulator::Deviation { moments, pending } = self {
            if !pending.is_empty() {
                moments.merge(&Moments::from_values(pending));
                pending.clear();
            }
        }
    }

    /// Merges another partial accumulator of the same aggregator.
    pub fn merge(&mut self, spec: &AggregateSpec, other: &Accumulator) -> Result<(), ReduceError> {
        self.check(spec)?;
        other.check(spec)?;
        let mut other = other.clone();
        other.flush();
        self.flush();
        match (self, &other) {
            (Accumulator::Count(a), Accumulator::Count(b)) => *a += *b,
            (Accumulator::Sum(a), Accumulator::Sum(b)) => *a += *b,
            (
                Accumulator::Avg { sum: s1, count: c1 },
                Accumulator::Avg { sum: s2, count: c2 },
            ) => {
                *s1 += *s2;
                *c1 += *c2;
            }
            (Accumulator::Min(a), Accumulator::Min(b)) => a.merge(b, Ordering::Less),
            (Accumulator::Max(a), Accumulator::Max(b)) => a.merge(b, Ordering::Greater),
            (Accumulator::Range(a), Accumulator::Range(b)) => {
                if let Some((lo, hi)) = *b {
                    *a = Some(match *a {
                        Some((x, y)) => (x.min(lo), y.max(hi)),
                        None => (lo, hi),
                    });
                }
            }
            (Accumulator::Deviation { moments: a, .. }, Accumulator::Deviation { moments: b, .. }) => {
                a.merge(b)
            }
            (Accumulator::Distinct(a), Accumulator::Distinct(b)) => a.extend(b.iter().cloned()),
            (Accumulator::List(a), Accumulator::List(b)) => a.extend(b.iter().cloned()),
            _ => {
                return Err(ReduceError::AccumulatorMismatch {
                    key: spec.key.clone(),
                    expected: "partials of one aggregator",
                });
            }
        }
        Ok(())
    }

    /// Final value of the aggregator. `list` is truncated to `list_max` here
    /// and nowhere else.
    pub fn finalize(&self, spec: &AggregateSpec, list_max: usize) -> Result<FieldValue, ReduceError> {
        self.check(spec)?;
        let value = match self {
            Accumulator::Count(c) => FieldValue::from(*c),
            Accumulator::Sum(sum) => FieldValue::number(*sum),
            Accumulator::Avg { sum, count } => {
                if *count == 0 {
                    return Err(ReduceError::DivisionByZero(format!(
                        "{}: no numeric values",
                        spec.key
                    )));
                }
                FieldValue::Float64(sum / *count as f64)
            }
            Accumulator::Min(e) | Accumulator::Max(e) => e.finalize(),
            Accumulator::Range(range) => match range {
                Some((lo, hi)) => FieldValue::number(hi - lo),
                None => FieldValue::Null,
            },
            Accumulator::Deviation { moments, pending } => {
                let mut total = *moments;
                total.merge(&Moments::from_values(pending));
                let sample = spec.func == AggFunc::Stdev;
                match total.variance(sample) {
                    Some(var) => FieldValue::Float64(var.sqrt()),
                    None => {
                        return Err(ReduceError::DivisionByZero(format!(
                            "{}: {} numeric value(s)",
                            spec.key, total.count
                        )));
                    }
                }
            }
            Accumulator::Distinct(set) => match spec.func {
                AggFunc::Values => FieldValue::Utf8List(set.iter().cloned().collect()),
                _ => FieldValue::from(set.len() as u64),
            },
            Accumulator::List(items) => {
                FieldValue::Utf8List(items.iter().take(list_max).cloned().collect())
            }
        };
        Ok(value)
    }
}
