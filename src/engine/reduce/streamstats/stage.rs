use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ahash::RandomState;
use tracing::{debug, trace};

use crate::engine::errors::{EvalError, RecordError, ReduceError};
use crate::engine::reduce::bucket::BucketedResult;
use crate::engine::reduce::context::QueryContext;
use crate::engine::reduce::expr::BoolExpr;
use crate::engine::reduce::record_set::{Record, RecordSet};
use crate::engine::reduce::stats::spec::{AggFunc, AggSource, AggregateSpec};
use crate::engine::reduce::streamstats::window::StreamState;
use crate::engine::types::FieldValue;
use crate::shared::datetime::time_bucketing::{CalendarTimeBucketer, TimeSpan};

const STAGE: &str = "streamstats";

#[derive(Debug, Clone)]
pub struct StreamStatsOptions {
    /// Records per window; 0 means unbounded
    pub window: usize,
    /// Window indexes count every record (true) or only the group's records
    pub global: bool,
    /// Include the current record in the statistic written onto it
    pub current: bool,
    pub group_by: Vec<String>,
    /// Clears all state after a record matching this predicate
    pub reset_after: Option<Arc<dyn BoolExpr>>,
    /// Clears all state before a record matching this predicate is counted
    pub reset_before: Option<Arc<dyn BoolExpr>>,
    /// Clears all state whenever the group-by key differs from the previous record's
    pub reset_on_change: bool,
    /// Keeps only records within this span of the current record's timestamp.
    /// Raw records only; they must arrive sorted by time.
    pub time_window: Option<TimeSpan>,
    /// Records arrive newest first, so the time window reaches forward
    pub time_descending: bool,
}

impl Default for StreamStatsOptions {
    fn default() -> Self {
        Self {
            window: 0,
            global: true,
            current: true,
            group_by: Vec::new(),
            reset_after: None,
            reset_before: None,
            reset_on_change: false,
            time_window: None,
            time_descending: false,
        }
    }
}

impl StreamStatsOptions {
    fn is_windowed(&self) -> bool {
        self.window > 0 || self.time_window.is_some()
    }
}

/// Running statistics written onto every record as it streams past.
///
/// Records are taken in output position order; the arrival index keeps
/// counting across segments. Group-by keys partition the state but never
/// reorder output.
#[derive(Debug)]
pub struct StreamStatsStage {
    specs: Vec<AggregateSpec>,
    options: StreamStatsOptions,
    states: HashMap<(usize, String), StreamState, RandomState>,
    group_counters: HashMap<String, usize, RandomState>,
    /// `(window index, timestamp)` per group, oldest first; time windows only
    timelines: HashMap<String, VecDeque<(usize, i64)>, RandomState>,
    last_group: Option<String>,
    next_index: usize,
}

impl StreamStatsStage {
    pub fn new(
        specs: Vec<AggregateSpec>,
        options: StreamStatsOptions,
    ) -> Result<Self, ReduceError> {
        if specs.is_empty() {
            return Err(ReduceError::MalformedStage(
                "streamstats needs at least one aggregator".to_string(),
            ));
        }
        if let Some(span) = &options.time_window {
            if span.checked_millis().is_none() {
                return Err(ReduceError::MalformedStage(format!(
                    "time window {} is out of range",
                    span
                )));
            }
        }
        for spec in &specs {
            spec.validate()?;
            StreamState::new(spec.func, options.is_windowed())?;
        }
        Ok(Self {
            specs,
            options,
            states: HashMap::with_hasher(RandomState::new()),
            group_counters: HashMap::with_hasher(RandomState::new()),
            timelines: HashMap::with_hasher(RandomState::new()),
            last_group: None,
            next_index: 0,
        })
    }

    pub fn options(&self) -> &StreamStatsOptions {
        &self.options
    }

    /// Global mode: one unbounded state per aggregator for the whole stream.
    pub fn is_global_mode(&self) -> bool {
        !self.options.is_windowed() && self.options.group_by.is_empty()
    }

    pub fn process_records(
        &mut self,
        ctx: &mut QueryContext,
        records: &mut RecordSet,
    ) -> Result<(), ReduceError> {
        for spec in &self.specs {
            ctx.add_column(&spec.key);
        }
        let clock = self
            .options
            .time_window
            .map(|_| CalendarTimeBucketer::new(ctx.settings().time.clone()));
        let ids = records.ordered_ids()?;
        for id in &ids {
            let outputs = match records.get(id) {
                Some(row) => self.process_row(ctx, Some(id), row, clock.as_ref())?,
                None => continue,
            };
            if let Some(row) = records.get_mut(id) {
                for (key, value) in outputs {
                    row.insert(key, value);
                }
            }
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                target: "snel_reduce::streamstats",
                records = ids.len(),
                next_index = self.next_index,
                groups = self.group_counters.len(),
                "Processed record batch"
            );
        }
        Ok(())
    }

    /// Treats each bucket row as a record, in bucket order.
    pub fn process_buckets(
        &mut self,
        ctx: &mut QueryContext,
        result: &mut BucketedResult,
    ) -> Result<(), ReduceError> {
        if self.options.time_window.is_some() {
            return Err(ReduceError::MalformedStage(
                "streamstats time window needs raw records".to_string(),
            ));
        }
        for spec in &self.specs {
            ctx.add_column(&spec.key);
            result.ensure_stat_key(&spec.key);
        }
        for i in 0..result.buckets.len() {
            let row = result.row(&result.buckets[i]);
            let outputs = self.process_row(ctx, None, &row, None)?;
            let bucket = &mut result.buckets[i];
            for (key, value) in outputs {
                bucket.stats.insert(key, value);
            }
        }
        Ok(())
    }

    fn group_key(&self, row: &Record) -> Option<String> {
        let parts: Option<Vec<String>> = self
            .options
            .group_by
            .iter()
            .map(|f| {
                row.get(f)
                    .filter(|v| !v.is_null())
                    .map(FieldValue::to_string_repr)
            })
            .collect();
        parts.map(|p| p.join("\u{1f}"))
    }

    fn reset(&mut self, index: usize, reason: &'static str) {
        trace!(target: "snel_reduce::streamstats", index = index, reason = reason, "Resetting state");
        self.states.clear();
        self.group_counters.clear();
        self.timelines.clear();
    }

    /// Lowest window index still inside the time window ending at `ts`.
    fn time_cutoff(
        &mut self,
        clock: &CalendarTimeBucketer,
        group: &str,
        index: usize,
        ts: i64,
    ) -> Result<usize, EvalError> {
        let Some(span) = self.options.time_window else {
            return Ok(0);
        };
        let descending = self.options.time_descending;
        let threshold = clock
            .shift(ts, &span, !descending)
            .ok_or_else(|| EvalError::Other(format!("timestamp {} is out of range", ts)))?;

        let timeline = self.timelines.entry(group.to_string()).or_default();
        timeline.push_back((index, ts));
        while let Some(&(_, seen)) = timeline.front() {
            let outside = if descending {
                seen > threshold
            } else {
                seen < threshold
            };
            if !outside {
                break;
            }
            timeline.pop_front();
        }
        Ok(timeline.front().map_or(index, |&(i, _)| i))
    }

    fn process_row(
        &mut self,
        ctx: &mut QueryContext,
        record_id: Option<&str>,
        row: &Record,
        clock: Option<&CalendarTimeBucketer>,
    ) -> Result<Vec<(String, FieldValue)>, ReduceError> {
        let global_index = self.next_index;
        self.next_index += 1;

        let mut outputs = Vec::with_capacity(self.specs.len());
        let Some(group) = self.group_key(row) else {
            return Ok(outputs);
        };

        if self.options.reset_on_change
            && self.last_group.as_ref().is_some_and(|last| *last != group)
        {
            self.reset(global_index, "reset_on_change");
        }
        self.last_group = Some(group.clone());
        if triggers(ctx, record_id, self.options.reset_before.as_deref(), "reset_before", row) {
            self.reset(global_index, "reset_before");
        }

        let counter = self.group_counters.entry(group.clone()).or_insert(0);
        let group_index = *counter;
        *counter += 1;
        let index = if self.options.global {
            global_index
        } else {
            group_index
        };
        let window = self.options.window;
        let windowed = self.options.is_windowed();

        let time_cutoff = match clock {
            Some(clock) if self.options.time_window.is_some() => {
                let time_field = ctx.reduce_config().time_field.clone();
                let cutoff = match row.get(&time_field) {
                    Some(value) => value.as_i64().ok_or_else(|| EvalError::Type {
                        field: time_field.clone(),
                        value: value.to_string_repr(),
                        expected: "a timestamp",
                    }),
                    None => Err(EvalError::NullField(time_field.clone())),
                }
                .and_then(|ts| self.time_cutoff(clock, &group, index, ts));
                match cutoff {
                    Ok(cutoff) => Some(cutoff),
                    Err(err) => {
                        ctx.push_error(RecordError::new(STAGE, record_id, err.to_string()));
                        return Ok(outputs);
                    }
                }
            }
            _ => None,
        };

        for (i, spec) in self.specs.iter().enumerate() {
            let value = match spec.evaluate(row) {
                Ok(Some(v)) => match (&spec.source, spec.func) {
                    (AggSource::Predicate(_), AggFunc::Count) if v.as_i64() == Some(0) => None,
                    _ => Some(v),
                },
                Ok(None) => None,
                Err(err) if spec.source.is_constant() => {
                    return Err(ReduceError::ConstantEval(err));
                }
                Err(err) => {
                    ctx.push_error(RecordError::new(
                        STAGE,
                        record_id,
                        format!("{}: {}", spec.key, err),
                    ));
                    None
                }
            };

            let state = match self.states.entry((i, group.clone())) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(StreamState::new(spec.func, windowed)?),
            };
            if let Some(cutoff) = time_cutoff {
                state.evict_before(cutoff);
            }

            let before = if self.options.current {
                None
            } else {
                // The previous record's window: the last `window` records before this one
                if window > 0 && index > 0 {
                    state.evict(index - 1, window);
                }
                state.result(spec.func)
            };
            if window > 0 {
                state.evict(index, window);
            }
            if let Some(v) = value {
                let field = spec.fields().join(",");
                if let Err(err) = state.push(index, &v, &field) {
                    ctx.push_error(RecordError::new(
                        STAGE,
                        record_id,
                        format!("{}: {}", spec.key, err),
                    ));
                }
            }
            let out = if self.options.current {
                state.result(spec.func)
            } else {
                before
            };
            if let Some(out) = out {
                outputs.push((spec.key.clone(), out));
            }
        }

        if triggers(ctx, record_id, self.options.reset_after.as_deref(), "reset_after", row) {
            self.reset(global_index, "reset_after");
        }

        Ok(outputs)
    }
}

/// Whether a reset predicate fires on `row`; an absent field never does.
fn triggers(
    ctx: &mut QueryContext,
    record_id: Option<&str>,
    predicate: Option<&dyn BoolExpr>,
    label: &str,
    row: &Record,
) -> bool {
    let Some(predicate) = predicate else {
        return false;
    };
    match predicate.evaluate_bool(row) {
        Ok(hit) => hit,
        Err(err) if err.is_null_field() => false,
        Err(err) => {
            ctx.push_error(RecordError::new(
                STAGE,
                record_id,
                format!("{}: {}", label, err),
            ));
            false
        }
    }
}
