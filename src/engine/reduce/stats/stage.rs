use std::cmp::Ordering;
use std::collections::HashMap;

use ahash::RandomState;
use tracing::{debug, info};

use crate::engine::errors::{RecordError, ReduceError};
use crate::engine::reduce::bucket::{Bucket, BucketedResult};
use crate::engine::reduce::context::{QueryContext, SegmentBarrier};
use crate::engine::reduce::record_set::{Record, RecordSet};
use crate::engine::reduce::stats::accumulator::Accumulator;
use crate::engine::reduce::stats::combiner::{combine_record, combine_segment};
use crate::engine::reduce::stats::segment_stats::SegmentStats;
use crate::engine::reduce::stats::spec::AggregateSpec;
use crate::engine::types::FieldValue;

#[derive(Debug, Clone)]
struct GroupState {
    accumulators: Vec<Accumulator>,
    count: u64,
}

impl GroupState {
    fn new(specs: &[AggregateSpec]) -> Self {
        Self {
            accumulators: specs.iter().map(|s| Accumulator::for_func(s.func)).collect(),
            count: 0,
        }
    }
}

/// Grouped aggregation. Absorbs records or segment partial stats as they
/// arrive and emits one `BucketedResult` once every segment has been seen.
#[derive(Debug)]
pub struct StatsStage {
    specs: Vec<AggregateSpec>,
    group_by: Vec<String>,
    groups: HashMap<Vec<String>, GroupState, RandomState>,
    barrier: SegmentBarrier,
}

impl StatsStage {
    pub fn new(specs: Vec<AggregateSpec>, group_by: Vec<String>) -> Result<Self, ReduceError> {
        if specs.is_empty() {
            return Err(ReduceError::MalformedStage(
                "stats needs at least one aggregator".to_string(),
            ));
        }
        for (i, spec) in specs.iter().enumerate() {
            spec.validate()?;
            if specs[..i].iter().any(|other| other.key == spec.key) {
                return Err(ReduceError::MalformedSpec(format!(
                    "duplicate output key '{}'",
                    spec.key
                )));
            }
            if group_by.contains(&spec.key) {
                return Err(ReduceError::MalformedSpec(format!(
                    "output key '{}' shadows a group-by column",
                    spec.key
                )));
            }
        }
        Ok(Self {
            specs,
            group_by,
            groups: HashMap::with_hasher(RandomState::new()),
            barrier: SegmentBarrier::new(),
        })
    }

    pub fn specs(&self) -> &[AggregateSpec] {
        &self.specs
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    fn group_key(&self, row: &Record) -> Option<Vec<String>> {
        self.group_by
            .iter()
            .map(|field| {
                row.get(field)
                    .filter(|v| !v.is_null())
                    .map(FieldValue::to_string_repr)
            })
            .collect()
    }

    /// Folds every record of one segment, in output position order.
    pub fn absorb_records(
        &mut self,
        ctx: &mut QueryContext,
        records: &RecordSet,
    ) -> Result<(), ReduceError> {
        let mut skipped = 0usize;
        for id in records.ordered_ids()? {
            let Some(row) = records.get(&id) else {
                continue;
            };
            let Some(key) = self.group_key(row) else {
                skipped += 1;
                continue;
            };
            let state = self
                .groups
                .entry(key)
                .or_insert_with(|| GroupState::new(&self.specs));
            state.count += 1;
            for (spec, acc) in self.specs.iter().zip(state.accumulators.iter_mut()) {
                combine_record(ctx, spec, acc, Some(&id), row)?;
            }
        }
        for state in self.groups.values_mut() {
            state.accumulators.iter_mut().for_each(Accumulator::flush);
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                target: "snel_reduce::stats",
                records = records.len(),
                skipped_without_group = skipped,
                groups = self.groups.len(),
                "Absorbed record batch"
            );
        }
        Ok(())
    }

    /// Folds one segment's precomputed statistics. Only valid without group-by.
    pub fn absorb_segment_stats(
        &mut self,
        ctx: &mut QueryContext,
        segment: &SegmentStats,
    ) -> Result<(), ReduceError> {
        if !self.group_by.is_empty() {
            return Err(ReduceError::MalformedStage(
                "segment partial stats cannot feed a grouped stats stage".to_string(),
            ));
        }
        let state = self
            .groups
            .entry(Vec::new())
            .or_insert_with(|| GroupState::new(&self.specs));
        state.count += segment.record_count;
        for (spec, acc) in self.specs.iter().zip(state.accumulators.iter_mut()) {
            combine_segment(ctx, spec, acc, segment)?;
        }
        Ok(())
    }

    /// True once the call that completes the last segment arrives.
    pub fn arrive(&self, ctx: &QueryContext, finishes_segment: bool) -> bool {
        self.barrier.arrive(finishes_segment, ctx.total_segments())
    }

    /// Finalizes every group into buckets ordered by group key.
    ///
    /// Division by zero in a single statistic leaves that cell absent and is
    /// reported on the context; other failures abort.
    pub fn finalize(&mut self, ctx: &mut QueryContext) -> Result<BucketedResult, ReduceError> {
        if self.group_by.is_empty() && self.groups.is_empty() {
            self.groups.insert(Vec::new(), GroupState::new(&self.specs));
        }

        let mut entries: Vec<(Vec<String>, GroupState)> = self.groups.drain().collect();
        entries.sort_by(|(a, _), (b, _)| compare_keys(a, b));

        let stat_keys: Vec<String> = self.specs.iter().map(|s| s.key.clone()).collect();
        let mut result = BucketedResult::new(self.group_by.clone(), stat_keys);
        let list_max = ctx.reduce_config().list_max_size;

        for (key, state) in entries {
            let mut bucket = Bucket::new(key, state.count);
            for (spec, acc) in self.specs.iter().zip(state.accumulators.iter()) {
                let value = match acc.finalize(spec, list_max) {
                    Ok(v) => v,
                    Err(ReduceError::DivisionByZero(msg)) => {
                        ctx.push_error(RecordError::new("stats", None, msg));
                        FieldValue::Null
                    }
                    Err(e) => {
                        e.log_error();
                        return Err(e);
                    }
                };
                bucket.stats.insert(spec.key.clone(), value);
            }
            result.push(bucket)?;
        }

        for column in result.group_by.iter().chain(result.stat_keys.iter()) {
            ctx.add_column(column);
        }

        info!(
            target: "snel_reduce::stats",
            buckets = result.len(),
            aggregators = self.specs.len(),
            "Stats finalized"
        );
        Ok(result)
    }
}

fn compare_keys(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = FieldValue::from(x.as_str()).compare(&FieldValue::from(y.as_str()));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}
