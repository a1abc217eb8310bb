use tracing::{debug, info};

use crate::engine::errors::{RecordError, ReduceError};
use crate::engine::reduce::bin::BinStage;
use crate::engine::reduce::bucket::BucketedResult;
use crate::engine::reduce::context::QueryContext;
use crate::engine::reduce::dedup::DedupStage;
use crate::engine::reduce::order::{HeadStage, SortStage, TailStage};
use crate::engine::reduce::record_set::RecordSet;
use crate::engine::reduce::stats::{SegmentStats, StatsStage};
use crate::engine::reduce::streamstats::StreamStatsStage;
use crate::engine::reduce::transaction::TransactionStage;

/// What one pipeline call carries between stages.
#[derive(Debug, Default)]
pub struct SegmentBatch {
    pub records: Option<RecordSet>,
    pub buckets: Option<BucketedResult>,
    /// Precomputed partial statistics, consumed by a stats stage
    pub segment_stats: Option<SegmentStats>,
    /// This call completes one scanned segment
    pub finishes_segment: bool,
}

impl SegmentBatch {
    pub fn records(records: RecordSet, finishes_segment: bool) -> Self {
        Self {
            records: Some(records),
            finishes_segment,
            ..Self::default()
        }
    }

    pub fn buckets(buckets: BucketedResult, finishes_segment: bool) -> Self {
        Self {
            buckets: Some(buckets),
            finishes_segment,
            ..Self::default()
        }
    }

    pub fn segment_stats(stats: SegmentStats, finishes_segment: bool) -> Self {
        Self {
            segment_stats: Some(stats),
            finishes_segment,
            ..Self::default()
        }
    }

    /// Nothing to forward; keeps the segment signal for downstream counters.
    pub fn empty(finishes_segment: bool) -> Self {
        Self {
            finishes_segment,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.as_ref().is_none_or(RecordSet::is_empty)
            && self.buckets.is_none()
            && self.segment_stats.is_none()
    }
}

#[derive(Debug)]
pub enum Stage {
    Stats(StatsStage),
    StreamStats(StreamStatsStage),
    Dedup(DedupStage),
    Sort(SortStage),
    Head(HeadStage),
    Tail(TailStage),
    Bin(BinStage),
    Transaction(TransactionStage),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Stats(_) => "stats",
            Stage::StreamStats(_) => "streamstats",
            Stage::Dedup(_) => "dedup",
            Stage::Sort(_) => "sort",
            Stage::Head(_) => "head",
            Stage::Tail(_) => "tail",
            Stage::Bin(_) => "bin",
            Stage::Transaction(_) => "transaction",
        }
    }

    /// Whether raw records are held until every segment has arrived.
    pub fn is_barrier(&self) -> bool {
        match self {
            Stage::Stats(_) | Stage::Dedup(_) | Stage::Sort(_) | Stage::Tail(_) => true,
            Stage::StreamStats(_) => false,
            Stage::Head(stage) => stage.is_barrier(),
            Stage::Bin(stage) => stage.is_barrier(),
            Stage::Transaction(stage) => stage.is_barrier(),
        }
    }

    fn process(
        &mut self,
        ctx: &mut QueryContext,
        batch: SegmentBatch,
    ) -> Result<SegmentBatch, ReduceError> {
        let SegmentBatch {
            records,
            mut buckets,
            segment_stats,
            finishes_segment,
        } = batch;

        match self {
            Stage::Stats(stage) => {
                if buckets.is_some() {
                    return Err(ReduceError::MalformedStage(
                        "stats cannot consume bucketed results".to_string(),
                    ));
                }
                if let Some(records) = &records {
                    stage.absorb_records(ctx, records)?;
                }
                if let Some(segment) = &segment_stats {
                    stage.absorb_segment_stats(ctx, segment)?;
                }
                if stage.arrive(ctx, finishes_segment) {
                    return Ok(SegmentBatch::buckets(stage.finalize(ctx)?, true));
                }
                Ok(SegmentBatch::empty(finishes_segment))
            }
            Stage::StreamStats(stage) => {
                let mut records = records;
                if let Some(records) = records.as_mut() {
                    stage.process_records(ctx, records)?;
                }
                if let Some(result) = buckets.as_mut() {
                    stage.process_buckets(ctx, result)?;
                }
                Ok(SegmentBatch {
                    records,
                    buckets,
                    segment_stats,
                    finishes_segment,
                })
            }
            Stage::Dedup(stage) => {
                if let Some(result) = buckets.as_mut() {
                    stage.apply_buckets(result)?;
                }
                if let Some(records) = records {
                    stage.absorb(records)?;
                }
                let released = stage.arrive(ctx, finishes_segment);
                let records = if released {
                    Some(stage.finalize()?)
                } else {
                    None
                };
                Ok(SegmentBatch {
                    records,
                    buckets,
                    segment_stats,
                    finishes_segment,
                })
            }
            Stage::Sort(stage) => {
                if let Some(result) = buckets.as_mut() {
                    stage.sort_buckets(result);
                }
                if let Some(records) = records {
                    stage.absorb(records)?;
                }
                let records = stage
                    .arrive(ctx, finishes_segment)
                    .then(|| stage.finalize());
                Ok(SegmentBatch {
                    records,
                    buckets,
                    segment_stats,
                    finishes_segment,
                })
            }
            Stage::Head(stage) => {
                if let Some(result) = buckets.as_mut() {
                    stage.apply_buckets(ctx, result);
                }
                let records = if stage.is_barrier() {
                    if let Some(records) = records {
                        stage.buffer(records)?;
                    }
                    stage
                        .arrive(ctx, finishes_segment)
                        .then(|| stage.finalize(ctx))
                } else {
                    records
                        .map(|records| stage.apply_records(ctx, records))
                        .transpose()?
                };
                Ok(SegmentBatch {
                    records,
                    buckets,
                    segment_stats,
                    finishes_segment,
                })
            }
            Stage::Tail(stage) => {
                if let Some(result) = buckets.as_mut() {
                    stage.apply_buckets(result);
                }
                if let Some(records) = records {
                    stage.absorb(records)?;
                }
                let records = stage
                    .arrive(ctx, finishes_segment)
                    .then(|| stage.finalize());
                Ok(SegmentBatch {
                    records,
                    buckets,
                    segment_stats,
                    finishes_segment,
                })
            }
            Stage::Bin(stage) => {
                if let Some(result) = buckets.as_mut() {
                    stage.apply_buckets(ctx, result)?;
                }
                let records = if stage.is_barrier() {
                    if let Some(records) = records {
                        stage.absorb(records)?;
                    }
                    if stage.arrive(ctx, finishes_segment) {
                        Some(stage.finalize(ctx)?)
                    } else {
                        None
                    }
                } else {
                    let mut records = records;
                    if let Some(records) = records.as_mut() {
                        stage.process_records(ctx, records)?;
                    }
                    records
                };
                Ok(SegmentBatch {
                    records,
                    buckets,
                    segment_stats,
                    finishes_segment,
                })
            }
            Stage::Transaction(stage) => {
                if buckets.is_some() {
                    return Err(ReduceError::MalformedStage(
                        "transaction cannot consume bucketed results".to_string(),
                    ));
                }
                if let Some(records) = records {
                    stage.absorb(records)?;
                }
                let is_last = stage.arrive(ctx, finishes_segment);
                let records = if finishes_segment {
                    Some(stage.finish_segment(ctx, is_last)?)
                } else {
                    None
                };
                Ok(SegmentBatch {
                    records,
                    buckets: None,
                    segment_stats,
                    finishes_segment,
                })
            }
        }
    }
}

/// Ordered stages run over one query's segment deliveries.
///
/// Every call passes through every stage, so each barrier counts the same
/// finished segments: a barrier still holding data forwards an empty batch
/// carrying the caller's `finishes_segment` flag.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
    ctx: QueryContext,
    calls: u64,
}

impl Pipeline {
    pub fn new(ctx: QueryContext, stages: Vec<Stage>) -> Self {
        info!(
            target: "snel_reduce::pipeline",
            stages = stages.len(),
            barriers = stages.iter().filter(|s| s.is_barrier()).count(),
            total_segments = ctx.total_segments(),
            "Pipeline created"
        );
        Self {
            stages,
            ctx,
            calls: 0,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    /// Feeds one delivery through every stage in order.
    ///
    /// A hard error aborts the query: it is logged and returned with no
    /// partial output.
    pub fn process_segment(&mut self, batch: SegmentBatch) -> Result<SegmentBatch, ReduceError> {
        self.calls += 1;
        let mut batch = batch;
        for stage in self.stages.iter_mut() {
            let finishes_segment = batch.finishes_segment;
            batch = match stage.process(&mut self.ctx, batch) {
                Ok(out) => out,
                Err(err) => {
                    err.log_error();
                    return Err(err);
                }
            };
            debug_assert_eq!(batch.finishes_segment, finishes_segment);

            if tracing::enabled!(tracing::Level::DEBUG) {
                debug!(
                    target: "snel_reduce::pipeline",
                    stage = stage.name(),
                    call = self.calls,
                    records = batch.records.as_ref().map_or(0, RecordSet::len),
                    buckets = batch.buckets.as_ref().map_or(0, BucketedResult::len),
                    "Stage done"
                );
            }
        }
        Ok(batch)
    }

    /// Columns of the final output, in first-seen order.
    pub fn final_columns(&self) -> Vec<String> {
        self.ctx.final_columns()
    }

    /// Non-fatal per-record failures, in the order they occurred.
    pub fn errors(&self) -> &[RecordError] {
        self.ctx.errors()
    }

    pub fn into_errors(mut self) -> Vec<RecordError> {
        self.ctx.take_errors()
    }
}
