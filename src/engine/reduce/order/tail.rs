use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use tracing::debug;

use crate::engine::errors::ReduceError;
use crate::engine::reduce::bucket::BucketedResult;
use crate::engine::reduce::context::{QueryContext, SegmentBarrier};
use crate::engine::reduce::record_set::{Record, RecordSet};
use crate::shared::config::ReduceConfig;

/// What "last" means for the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailOrder {
    /// Latest by this epoch-millisecond field; arrival order breaks ties
    Timestamp(String),
    /// The order already fixed upstream (e.g. by an explicit sort)
    Established,
}

#[derive(Debug)]
struct TailEntry {
    ts: i64,
    seq: u64,
    id: String,
    record: Record,
}

impl TailEntry {
    fn rank(&self) -> (i64, u64) {
        (self.ts, self.seq)
    }
}

impl PartialEq for TailEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for TailEntry {}

impl PartialOrd for TailEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TailEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Keeps the last `limit` rows in a bounded min-queue and emits them newest first.
#[derive(Debug)]
pub struct TailStage {
    limit: usize,
    order: TailOrder,
    heap: BinaryHeap<Reverse<TailEntry>>,
    next_seq: u64,
    barrier: SegmentBarrier,
}

impl TailStage {
    pub fn new(limit: usize, order: TailOrder) -> Self {
        Self {
            limit,
            order,
            heap: BinaryHeap::with_capacity(limit.saturating_add(1).min(4096)),
            next_seq: 0,
            barrier: SegmentBarrier::new(),
        }
    }

    pub fn from_config(order: TailOrder, config: &ReduceConfig) -> Self {
        Self::new(config.tail_default_rows, order)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn timestamp_of(&self, record: &Record) -> i64 {
        match &self.order {
            TailOrder::Timestamp(field) => record
                .get(field)
                .and_then(|v| v.as_i64())
                .unwrap_or(i64::MIN),
            TailOrder::Established => 0,
        }
    }

    pub fn absorb(&mut self, records: RecordSet) -> Result<(), ReduceError> {
        for (id, record) in records.into_ordered()? {
            let entry = TailEntry {
                ts: self.timestamp_of(&record),
                seq: self.next_seq,
                id,
                record,
            };
            self.next_seq += 1;
            self.heap.push(Reverse(entry));
            if self.heap.len() > self.limit {
                self.heap.pop();
            }
        }
        Ok(())
    }

    pub fn arrive(&self, ctx: &QueryContext, finishes_segment: bool) -> bool {
        self.barrier.arrive(finishes_segment, ctx.total_segments())
    }

    /// Kept rows, newest first.
    pub fn finalize(&mut self) -> RecordSet {
        let mut entries: Vec<TailEntry> = std::mem::take(&mut self.heap)
            .into_iter()
            .map(|Reverse(e)| e)
            .collect();
        entries.sort_by(|a, b| b.cmp(a));
        debug!(target: "snel_reduce::tail", rows = entries.len(), "Tail released");
        RecordSet::from_ordered(entries.into_iter().map(|e| (e.id, e.record)))
    }

    /// Last `limit` buckets of a materialized result, reversed.
    pub fn apply_buckets(&self, result: &mut BucketedResult) {
        let start = result.buckets.len().saturating_sub(self.limit);
        let mut tail = result.buckets.split_off(start);
        tail.reverse();
        result.buckets = tail;
    }
}
