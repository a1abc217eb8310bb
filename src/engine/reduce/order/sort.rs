use std::cmp::Ordering;

use tracing::{debug, info};

use crate::engine::errors::ReduceError;
use crate::engine::reduce::bucket::BucketedResult;
use crate::engine::reduce::context::{QueryContext, SegmentBarrier};
use crate::engine::reduce::order::sort_key::{SortElement, SortKey, compare_keys, extract_keys};
use crate::engine::reduce::record_set::{Record, RecordSet};
use crate::shared::config::ReduceConfig;

#[derive(Debug, Clone)]
struct SortedRow {
    keys: Vec<SortKey>,
    seq: u64,
    id: String,
    record: Record,
}

/// Full-stream sort with a limit.
///
/// After every segment the kept rows are merged and cut back to the limit,
/// so state never exceeds `limit` rows between segments. Equal keys keep
/// arrival order.
#[derive(Debug)]
pub struct SortStage {
    elements: Vec<SortElement>,
    limit: usize,
    kept: Vec<SortedRow>,
    next_seq: u64,
    barrier: SegmentBarrier,
}

impl SortStage {
    pub fn new(elements: Vec<SortElement>, limit: usize) -> Result<Self, ReduceError> {
        if elements.is_empty() {
            return Err(ReduceError::MalformedStage(
                "sort needs at least one field".to_string(),
            ));
        }
        if limit == 0 {
            return Err(ReduceError::MalformedStage(
                "sort limit must be positive".to_string(),
            ));
        }
        Ok(Self {
            elements,
            limit,
            kept: Vec::new(),
            next_seq: 0,
            barrier: SegmentBarrier::new(),
        })
    }

    /// Sort limited to `reduce.sort_default_limit`.
    pub fn from_config(
        elements: Vec<SortElement>,
        config: &ReduceConfig,
    ) -> Result<Self, ReduceError> {
        Self::new(elements, config.sort_default_limit)
    }

    pub fn elements(&self) -> &[SortElement] {
        &self.elements
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn order(&self, a: &SortedRow, b: &SortedRow) -> Ordering {
        compare_keys(&a.keys, &b.keys, &self.elements).then(a.seq.cmp(&b.seq))
    }

    /// Merges one segment's records into the kept prefix.
    pub fn absorb(&mut self, records: RecordSet) -> Result<(), ReduceError> {
        let incoming = records.len();
        for (id, record) in records.into_ordered()? {
            let keys = extract_keys(&record, &self.elements);
            self.kept.push(SortedRow {
                keys,
                seq: self.next_seq,
                id,
                record,
            });
            self.next_seq += 1;
        }

        let mut kept = std::mem::take(&mut self.kept);
        kept.sort_by(|a, b| self.order(a, b));
        kept.truncate(self.limit);
        self.kept = kept;

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                target: "snel_reduce::sort",
                incoming = incoming,
                kept = self.kept.len(),
                limit = self.limit,
                "Merged segment into sorted prefix"
            );
        }
        Ok(())
    }

    pub fn arrive(&self, ctx: &QueryContext, finishes_segment: bool) -> bool {
        self.barrier.arrive(finishes_segment, ctx.total_segments())
    }

    /// Emits the sorted rows with fresh positions.
    pub fn finalize(&mut self) -> RecordSet {
        let rows = std::mem::take(&mut self.kept);
        info!(target: "snel_reduce::sort", rows = rows.len(), "Sort released");
        RecordSet::from_ordered(rows.into_iter().map(|r| (r.id, r.record)))
    }

    /// Sorts a materialized bucketed result in place.
    pub fn sort_buckets(&self, result: &mut BucketedResult) {
        let mut keyed: Vec<(Vec<SortKey>, usize)> = result
            .buckets
            .iter()
            .enumerate()
            .map(|(i, b)| (extract_keys(&result.row(b), &self.elements), i))
            .collect();
        keyed.sort_by(|(ka, ia), (kb, ib)| {
            compare_keys(ka, kb, &self.elements).then(ia.cmp(ib))
        });
        keyed.truncate(self.limit);

        let mut slots: Vec<Option<_>> = std::mem::take(&mut result.buckets)
            .into_iter()
            .map(Some)
            .collect();
        result.buckets = keyed
            .into_iter()
            .filter_map(|(_, i)| slots[i].take())
            .collect();
    }
}
