use tracing::{debug, info};

use crate::engine::errors::ReduceError;
use crate::engine::reduce::bucket::BucketedResult;
use crate::engine::reduce::context::{QueryContext, SegmentBarrier};
use crate::engine::reduce::dedup::table::{CombinationTable, DedupOptions};
use crate::engine::reduce::order::sort_key::extract_keys;
use crate::engine::reduce::record_set::{Record, RecordSet};
use crate::engine::types::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Kept,
    Dropped,
}

/// Keeps at most `limit` rows per distinct combination of the dedup fields.
///
/// Over raw records it is a barrier: every segment is buffered and the
/// table runs once, in arrival order, when the last segment lands. Over a
/// bucketed result each result is decided on its own with a fresh table.
#[derive(Debug)]
pub struct DedupStage {
    options: DedupOptions,
    buffered: Vec<(String, Record)>,
    barrier: SegmentBarrier,
}

impl DedupStage {
    pub fn new(options: DedupOptions) -> Result<Self, ReduceError> {
        options.validate()?;
        Ok(Self {
            options,
            buffered: Vec::new(),
            barrier: SegmentBarrier::new(),
        })
    }

    pub fn options(&self) -> &DedupOptions {
        &self.options
    }

    pub fn absorb(&mut self, records: RecordSet) -> Result<(), ReduceError> {
        self.buffered.extend(records.into_ordered()?);
        Ok(())
    }

    pub fn arrive(&self, ctx: &QueryContext, finishes_segment: bool) -> bool {
        self.barrier.arrive(finishes_segment, ctx.total_segments())
    }

    /// Runs the table over everything buffered and returns the survivors.
    pub fn finalize(&mut self) -> Result<RecordSet, ReduceError> {
        let rows = std::mem::take(&mut self.buffered);
        let fates = self.decide(rows.iter().map(|(_, r)| r))?;

        let total = rows.len();
        let mut out = Vec::with_capacity(total);
        for ((id, mut record), fate) in rows.into_iter().zip(fates) {
            match fate {
                Fate::Kept => out.push((id, record)),
                Fate::Dropped if self.options.keep_events => {
                    for field in &self.options.fields {
                        if let Some(value) = record.get_mut(field) {
                            *value = FieldValue::Null;
                        }
                    }
                    out.push((id, record));
                }
                Fate::Dropped => {}
            }
        }

        info!(
            target: "snel_reduce::dedup",
            buffered = total,
            kept = out.len(),
            "Dedup released"
        );
        Ok(RecordSet::from_ordered(out))
    }

    /// Dedups one materialized bucketed result in place.
    pub fn apply_buckets(&self, result: &mut BucketedResult) -> Result<(), ReduceError> {
        let rows: Vec<Record> = result.buckets.iter().map(|b| result.row(b)).collect();
        let fates = self.decide(rows.iter())?;

        let buckets = std::mem::take(&mut result.buckets);
        let mut kept = Vec::with_capacity(buckets.len());
        for (mut bucket, fate) in buckets.into_iter().zip(fates) {
            match fate {
                Fate::Kept => kept.push(bucket),
                Fate::Dropped if self.options.keep_events => {
                    for field in &self.options.fields {
                        result.blank(&mut bucket, field);
                    }
                    kept.push(bucket);
                }
                Fate::Dropped => {}
            }
        }
        result.buckets = kept;
        Ok(())
    }

    /// Offers each row to a fresh table in order; evictions rewrite earlier fates.
    fn decide<'a, I>(&self, rows: I) -> Result<Vec<Fate>, ReduceError>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut table = CombinationTable::new();
        let elements = self.options.policy.sort_elements();
        let mut fates = Vec::new();
        let mut evictions = 0usize;

        for (seq, row) in rows.into_iter().enumerate() {
            let values: Vec<Option<&FieldValue>> =
                self.options.fields.iter().map(|f| row.get(f)).collect();
            let keys = extract_keys(row, elements);
            let decision = table.passes(&self.options, &values, seq as u64, keys)?;
            if let Some(evicted) = decision.evict {
                if let Some(fate) = fates.get_mut(evicted as usize) {
                    *fate = Fate::Dropped;
                    evictions += 1;
                }
            }
            fates.push(if decision.keep {
                Fate::Kept
            } else {
                Fate::Dropped
            });
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                target: "snel_reduce::dedup",
                rows = fates.len(),
                combinations = table.combinations(),
                evictions = evictions,
                "Dedup table built"
            );
        }
        Ok(fates)
    }
}
