use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::engine::errors::{EvalError, ReduceError};
use crate::engine::reduce::stats::spec::AggFunc;
use crate::engine::types::FieldValue;

/// Deque of `(arrival index, value)` kept monotonic so its front is always
/// the extremum of the current window.
#[derive(Debug, Clone)]
pub struct MonotonicDeque {
    entries: VecDeque<(usize, f64)>,
    /// `Less` keeps a minimum, `Greater` a maximum
    keep: Ordering,
}

impl MonotonicDeque {
    pub fn min() -> Self {
        Self {
            entries: VecDeque::new(),
            keep: Ordering::Less,
        }
    }

    pub fn max() -> Self {
        Self {
            entries: VecDeque::new(),
            keep: Ordering::Greater,
        }
    }

    /// Drops every back entry the new value makes unreachable, then appends it.
    pub fn push(&mut self, index: usize, value: f64) {
        while let Some(&(_, back)) = self.entries.back() {
            let dominated = match self.keep {
                Ordering::Less => back >= value,
                _ => back <= value,
            };
            if !dominated {
                break;
            }
            self.entries.pop_back();
        }
        self.entries.push_back((index, value));
    }

    /// Evicts entries that fell out of a window of `window` ending at `current`.
    pub fn evict(&mut self, current: usize, window: usize) {
        self.evict_before((current + 1).saturating_sub(window));
    }

    /// Evicts entries whose index is below `cutoff`.
    pub fn evict_before(&mut self, cutoff: usize) {
        while let Some(&(index, _)) = self.entries.front() {
            if index >= cutoff {
                break;
            }
            self.entries.pop_front();
        }
    }

    pub fn front(&self) -> Option<f64> {
        self.entries.front().map(|&(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn numeric(value: &FieldValue, field: &str) -> Result<f64, EvalError> {
    value.as_f64().ok_or_else(|| EvalError::Type {
        field: field.to_string(),
        value: value.to_string_repr(),
        expected: "numeric",
    })
}

/// Sliding-window state of one aggregator for one group.
#[derive(Debug, Clone)]
pub enum WindowState {
    Count(VecDeque<usize>),
    /// Shared by `sum` and `avg`
    Sum {
        entries: VecDeque<(usize, f64)>,
        sum: f64,
    },
    Extreme(MonotonicDeque),
    Range {
        low: MonotonicDeque,
        high: MonotonicDeque,
    },
    Distinct {
        entries: VecDeque<(usize, String)>,
        counts: BTreeMap<String, usize>,
    },
}

impl WindowState {
    pub fn for_func(func: AggFunc) -> Result<Self, ReduceError> {
        let state = match func {
            AggFunc::Count => WindowState::Count(VecDeque::new()),
            AggFunc::Sum | AggFunc::Avg => WindowState::Sum {
                entries: VecDeque::new(),
                sum: 0.0,
            },
            AggFunc::Min => WindowState::Extreme(MonotonicDeque::min()),
            AggFunc::Max => WindowState::Extreme(MonotonicDeque::max()),
            AggFunc::Range => WindowState::Range {
                low: MonotonicDeque::min(),
                high: MonotonicDeque::max(),
            },
            AggFunc::Cardinality | AggFunc::Values => WindowState::Distinct {
                entries: VecDeque::new(),
                counts: BTreeMap::new(),
            },
            other => {
                return Err(ReduceError::MalformedSpec(format!(
                    "{} is not supported by streaming stats",
                    other
                )));
            }
        };
        Ok(state)
    }

    pub fn evict(&mut self, current: usize, window: usize) {
        self.evict_before((current + 1).saturating_sub(window));
    }

    /// Drops every entry whose arrival index is below `cutoff`.
    pub fn evict_before(&mut self, cutoff: usize) {
        let expired = |index: usize| index < cutoff;
        match self {
            WindowState::Count(entries) => {
                while entries.front().is_some_and(|&i| expired(i)) {
                    entries.pop_front();
                }
            }
            WindowState::Sum { entries, sum } => {
                while let Some(&(i, v)) = entries.front() {
                    if !expired(i) {
                        break;
                    }
                    *sum -= v;
                    entries.pop_front();
                }
                if entries.is_empty() {
                    *sum = 0.0;
                }
            }
            WindowState::Extreme(deque) => deque.evict_before(cutoff),
            WindowState::Range { low, high } => {
                low.evict_before(cutoff);
                high.evict_before(cutoff);
            }
            WindowState::Distinct { entries, counts } => {
                while let Some((i, _)) = entries.front() {
                    if !expired(*i) {
                        break;
                    }
                    if let Some((_, key)) = entries.pop_front() {
                        if let Some(n) = counts.get_mut(&key) {
                            *n -= 1;
                            if *n == 0 {
                                counts.remove(&key);
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn push(&mut self, index: usize, value: &FieldValue, field: &str) -> Result<(), EvalError> {
        match self {
            WindowState::Count(entries) => entries.push_back(index),
            WindowState::Sum { entries, sum } => {
                let v = numeric(value, field)?;
                *sum += v;
                entries.push_back((index, v));
            }
            WindowState::Extreme(deque) => deque.push(index, numeric(value, field)?),
            WindowState::Range { low, high } => {
                let v = numeric(value, field)?;
                low.push(index, v);
                high.push(index, v);
            }
            WindowState::Distinct { entries, counts } => {
                let key = value.to_string_repr();
                *counts.entry(key.clone()).or_insert(0) += 1;
                entries.push_back((index, key));
            }
        }
        Ok(())
    }

    pub fn result(&self, func: AggFunc) -> Option<FieldValue> {
        match self {
            WindowState::Count(entries) => {
                (!entries.is_empty()).then(|| FieldValue::from(entries.len() as u64))
            }
            WindowState::Sum { entries, sum } => {
                if entries.is_empty() {
                    return None;
                }
                Some(match func {
                    AggFunc::Avg => FieldValue::Float64(sum / entries.len() as f64),
                    _ => FieldValue::number(*sum),
                })
            }
            WindowState::Extreme(deque) => deque.front().map(FieldValue::number),
            WindowState::Range { low, high } => match (low.front(), high.front()) {
                (Some(lo), Some(hi)) => Some(FieldValue::number(hi - lo)),
                _ => None,
            },
            WindowState::Distinct { counts, .. } => {
                if counts.is_empty() {
                    return None;
                }
                Some(match func {
                    AggFunc::Values => FieldValue::Utf8List(counts.keys().cloned().collect()),
                    _ => FieldValue::from(counts.len() as u64),
                })
            }
        }
    }
}

/// Unbounded running state of one aggregator for one group.
#[derive(Debug, Clone)]
pub enum RunningState {
    Count(u64),
    Sum { sum: f64, count: u64 },
    Min(Option<f64>),
    Max(Option<f64>),
    Range(Option<(f64, f64)>),
    Distinct(BTreeSet<String>),
}

impl RunningState {
    pub fn for_func(func: AggFunc) -> Result<Self, ReduceError> {
        let state = match func {
            AggFunc::Count => RunningState::Count(0),
            AggFunc::Sum | AggFunc::Avg => RunningState::Sum { sum: 0.0, count: 0 },
            AggFunc::Min => RunningState::Min(None),
            AggFunc::Max => RunningState::Max(None),
            AggFunc::Range => RunningState::Range(None),
            AggFunc::Cardinality | AggFunc::Values => RunningState::Distinct(BTreeSet::new()),
            other => {
                return Err(ReduceError::MalformedSpec(format!(
                    "{} is not supported by streaming stats",
                    other
                )));
            }
        };
        Ok(state)
    }

    pub fn push(&mut self, value: &FieldValue, field: &str) -> Result<(), EvalError> {
        match self {
            RunningState::Count(c) => *c += 1,
            RunningState::Sum { sum, count } => {
                *sum += numeric(value, field)?;
                *count += 1;
            }
            RunningState::Min(cur) => {
                let v = numeric(value, field)?;
                *cur = Some(cur.map_or(v, |c| c.min(v)));
            }
            RunningState::Max(cur) => {
                let v = numeric(value, field)?;
                *cur = Some(cur.map_or(v, |c| c.max(v)));
            }
            RunningState::Range(cur) => {
                let v = numeric(value, field)?;
                *cur = Some(match *cur {
                    Some((lo, hi)) => (lo.min(v), hi.max(v)),
                    None => (v, v),
                });
            }
            RunningState::Distinct(set) => {
                set.insert(value.to_string_repr());
            }
        }
        Ok(())
    }

    /// Current value; the average is taken from the running totals at this point.
    pub fn result(&self, func: AggFunc) -> Option<FieldValue> {
        match self {
            RunningState::Count(0) => None,
            RunningState::Count(c) => Some(FieldValue::from(*c)),
            RunningState::Sum { count: 0, .. } => None,
            RunningState::Sum { sum, count } => Some(match func {
                AggFunc::Avg => FieldValue::Float64(sum / *count as f64),
                _ => FieldValue::number(*sum),
            }),
            RunningState::Min(v) | RunningState::Max(v) => v.map(FieldValue::number),
            RunningState::Range(r) => r.map(|(lo, hi)| FieldValue::number(hi - lo)),
            RunningState::Distinct(set) if set.is_empty() => None,
            RunningState::Distinct(set) => Some(match func {
                AggFunc::Values => FieldValue::Utf8List(set.iter().cloned().collect()),
                _ => FieldValue::from(set.len() as u64),
            }),
        }
    }
}

/// Either flavour, chosen once per query by whether a window is configured.
#[derive(Debug, Clone)]
pub enum StreamState {
    Running(RunningState),
    Windowed(WindowState),
}

impl StreamState {
    pub fn new(func: AggFunc, windowed: bool) -> Result<Self, ReduceError> {
        if windowed {
            WindowState::for_func(func).map(StreamState::Windowed)
        } else {
            RunningState::for_func(func).map(StreamState::Running)
        }
    }

    pub fn evict(&mut self, current: usize, window: usize) {
        if let StreamState::Windowed(w) = self {
            w.evict(current, window);
        }
    }

    pub fn evict_before(&mut self, cutoff: usize) {
        if let StreamState::Windowed(w) = self {
            w.evict_before(cutoff);
        }
    }

    pub fn push(&mut self, index: usize, value: &FieldValue, field: &str) -> Result<(), EvalError> {
        match self {
            StreamState::Running(r) => r.push(value, field),
            StreamState::Windowed(w) => w.push(index, value, field),
        }
    }

    pub fn result(&self, func: AggFunc) -> Option<FieldValue> {
        match self {
            StreamState::Running(r) => r.result(func),
            StreamState::Windowed(w) => w.result(func),
        }
    }
}
