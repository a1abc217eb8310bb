use tracing::{debug, info};

use crate::engine::errors::{RecordError, ReduceError};
use crate::engine::reduce::context::{QueryContext, SegmentBarrier};
use crate::engine::reduce::record_set::{Record, RecordSet};
use crate::engine::reduce::transaction::grouper::{
    TransactionGroup, TransactionGrouper, TransactionOptions,
};

const STAGE: &str = "transaction";

/// Groups a time-ordered record stream into transactions.
///
/// Each finished segment is stable-sorted by timestamp and fed to the
/// grouper; segments must arrive in non-decreasing time order. Without an
/// end predicate the stage is a barrier: groups are held and any still open
/// are force-closed once the last segment has been processed. With one,
/// closed groups are emitted after every segment and groups still open at
/// the end are discarded.
#[derive(Debug)]
pub struct TransactionStage {
    grouper: TransactionGrouper,
    time_field: String,
    segment: Vec<(String, Record)>,
    closed: Vec<TransactionGroup>,
    barrier: SegmentBarrier,
}

impl TransactionStage {
    pub fn new(ctx: &QueryContext, options: TransactionOptions) -> Self {
        let time_field = options
            .time_field
            .clone()
            .unwrap_or_else(|| ctx.reduce_config().time_field.clone());
        let fields = if options.fields.is_empty() {
            vec![time_field.clone()]
        } else {
            options.fields.clone()
        };
        Self {
            grouper: TransactionGrouper::new(fields, &options),
            time_field,
            segment: Vec::new(),
            closed: Vec::new(),
            barrier: SegmentBarrier::new(),
        }
    }

    pub fn grouper(&self) -> &TransactionGrouper {
        &self.grouper
    }

    pub fn is_barrier(&self) -> bool {
        !self.grouper.has_end()
    }

    /// Columns of an emitted transaction row.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = [
            "timestamp",
            "duration",
            "eventcount",
            "event",
            "transactionKey",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        for field in self.grouper.fields() {
            if !columns.contains(field) {
                columns.push(field.clone());
            }
        }
        columns
    }

    /// Adds records to the segment in progress.
    pub fn absorb(&mut self, records: RecordSet) -> Result<(), ReduceError> {
        self.segment.extend(records.into_ordered()?);
        Ok(())
    }

    pub fn arrive(&self, ctx: &QueryContext, finishes_segment: bool) -> bool {
        self.barrier.arrive(finishes_segment, ctx.total_segments())
    }

    /// Runs the finished segment through the grouper and returns the
    /// transactions ready to leave the stage.
    pub fn finish_segment(
        &mut self,
        ctx: &mut QueryContext,
        is_last: bool,
    ) -> Result<RecordSet, ReduceError> {
        let rows = std::mem::take(&mut self.segment);
        let mut timed = Vec::with_capacity(rows.len());
        for (id, record) in rows {
            match record.get(&self.time_field).and_then(|v| v.as_i64()) {
                Some(ts) => timed.push((ts, id, record)),
                None => ctx.push_error(RecordError::new(
                    STAGE,
                    Some(&id),
                    format!("missing or non-integer '{}'", self.time_field),
                )),
            }
        }
        // Stable: equal timestamps keep position order
        timed.sort_by_key(|(ts, _, _)| *ts);

        let fed = timed.len();
        for (ts, id, record) in timed {
            if let Some(group) = self.grouper.feed(ctx, &id, ts, record) {
                self.closed.push(group);
            }
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                target: "snel_reduce::transaction",
                fed = fed,
                closed = self.closed.len(),
                open_keys = self.grouper.open_keys(),
                pending_events = self.grouper.pending_events(),
                "Segment grouped"
            );
        }

        if is_last {
            if self.grouper.has_end() {
                let discarded = self.grouper.pending_events();
                if discarded > 0 {
                    debug!(
                        target: "snel_reduce::transaction",
                        discarded = discarded,
                        "Open transactions without an end were discarded"
                    );
                }
            } else {
                self.closed.extend(self.grouper.close_all());
            }
        } else if self.is_barrier() {
            return Ok(RecordSet::new());
        }

        let mut groups = std::mem::take(&mut self.closed);
        groups.sort_by_key(|g| g.anchor_ts);
        let fields = self.grouper.fields().to_vec();
        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            out.push(group.into_record(&fields)?);
        }

        ctx.replace_columns(self.output_columns());
        if is_last {
            info!(
                target: "snel_reduce::transaction",
                skipped = self.grouper.skipped(),
                "Transactions complete"
            );
        }
        Ok(RecordSet::from_ordered(out))
    }
}
