use std::sync::Arc;

use tracing::debug;

use crate::engine::errors::{EvalError, RecordError, ReduceError};
use crate::engine::reduce::bucket::BucketedResult;
use crate::engine::reduce::context::{QueryContext, SegmentBarrier};
use crate::engine::reduce::expr::BoolExpr;
use crate::engine::reduce::record_set::{Record, RecordSet};
use crate::shared::config::ReduceConfig;

const STAGE: &str = "head";

#[derive(Debug, Clone)]
pub enum HeadMode {
    /// First `n` rows; streaming
    Count(usize),
    /// Rows while the predicate holds; barrier
    Predicate {
        expr: Arc<dyn BoolExpr>,
        /// A row whose predicate hits an absent field is kept and scanning continues
        keep_null: bool,
        /// The row that ends the run is kept
        keep_last: bool,
        max_rows: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    KeepAndStop,
    Stop,
}

#[derive(Debug)]
pub struct HeadStage {
    mode: HeadMode,
    emitted: usize,
    done: bool,
    buffered: Vec<(String, Record)>,
    barrier: SegmentBarrier,
}

impl HeadStage {
    pub fn new(mode: HeadMode) -> Self {
        Self {
            mode,
            emitted: 0,
            done: false,
            buffered: Vec::new(),
            barrier: SegmentBarrier::new(),
        }
    }

    pub fn count(n: usize) -> Self {
        Self::new(HeadMode::Count(n))
    }

    /// `reduce.head_default_rows` rows.
    pub fn from_config(config: &ReduceConfig) -> Self {
        Self::count(config.head_default_rows)
    }

    pub fn predicate(expr: Arc<dyn BoolExpr>, keep_null: bool, keep_last: bool) -> Self {
        Self::new(HeadMode::Predicate {
            expr,
            keep_null,
            keep_last,
            max_rows: None,
        })
    }

    pub fn with_max_rows(mut self, max: usize) -> Self {
        if let HeadMode::Predicate { max_rows, .. } = &mut self.mode {
            *max_rows = Some(max);
        }
        self
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self.mode, HeadMode::Predicate { .. })
    }

    fn verdict(&self, outcome: Result<bool, EvalError>) -> Result<Verdict, EvalError> {
        let HeadMode::Predicate {
            keep_null,
            keep_last,
            ..
        } = &self.mode
        else {
            return Ok(Verdict::Keep);
        };
        match outcome {
            Ok(true) => Ok(Verdict::Keep),
            Ok(false) if *keep_last => Ok(Verdict::KeepAndStop),
            Ok(false) => Ok(Verdict::Stop),
            Err(err) if err.is_null_field() => Ok(if *keep_null {
                Verdict::Keep
            } else if *keep_last {
                Verdict::KeepAndStop
            } else {
                Verdict::Stop
            }),
            Err(err) => Err(err),
        }
    }

    /// Runs the cutoff over rows in established order; returns the indexes kept.
    fn select<'a, I>(
        &mut self,
        ctx: &mut QueryContext,
        rows: I,
    ) -> Vec<usize>
    where
        I: IntoIterator<Item = (Option<&'a str>, &'a Record)>,
    {
        let mut kept = Vec::new();
        for (i, (id, row)) in rows.into_iter().enumerate() {
            if self.done {
                break;
            }
            let verdict = match &self.mode {
                HeadMode::Count(n) => {
                    if self.emitted >= *n {
                        self.done = true;
                        break;
                    }
                    Verdict::Keep
                }
                HeadMode::Predicate { expr, .. } => {
                    let outcome = expr.evaluate_bool(row);
                    match self.verdict(outcome) {
                        Ok(v) => v,
                        Err(err) => {
                            ctx.push_error(RecordError::new(STAGE, id, err.to_string()));
                            Verdict::Stop
                        }
                    }
                }
            };
            match verdict {
                Verdict::Keep => {
                    kept.push(i);
                    self.emitted += 1;
                }
                Verdict::KeepAndStop => {
                    kept.push(i);
                    self.emitted += 1;
                    self.done = true;
                }
                Verdict::Stop => self.done = true,
            }
            let cap = match &self.mode {
                HeadMode::Count(n) => Some(*n),
                HeadMode::Predicate { max_rows, .. } => *max_rows,
            };
            if cap.is_some_and(|cap| self.emitted >= cap) {
                self.done = true;
            }
        }
        kept
    }

    /// Fixed-count cutoff over one segment; the count carries across segments.
    pub fn apply_records(
        &mut self,
        ctx: &mut QueryContext,
        records: RecordSet,
    ) -> Result<RecordSet, ReduceError> {
        let rows = records.into_ordered()?;
        let kept = self.select(ctx, rows.iter().map(|(id, r)| (Some(id.as_str()), r)));
        Ok(take_rows(rows, &kept))
    }

    /// Holds a segment until the barrier releases (predicate mode).
    pub fn buffer(&mut self, records: RecordSet) -> Result<(), ReduceError> {
        self.buffered.extend(records.into_ordered()?);
        Ok(())
    }

    pub fn arrive(&self, ctx: &QueryContext, finishes_segment: bool) -> bool {
        self.barrier.arrive(finishes_segment, ctx.total_segments())
    }

    /// Evaluates the predicate over everything buffered, in arrival order.
    pub fn finalize(&mut self, ctx: &mut QueryContext) -> RecordSet {
        let rows = std::mem::take(&mut self.buffered);
        let kept = self.select(ctx, rows.iter().map(|(id, r)| (Some(id.as_str()), r)));
        debug!(
            target: "snel_reduce::head",
            buffered = rows.len(),
            kept = kept.len(),
            "Predicate head released"
        );
        take_rows(rows, &kept)
    }

    /// Applies the cutoff to one materialized bucketed result on its own.
    pub fn apply_buckets(&mut self, ctx: &mut QueryContext, result: &mut BucketedResult) {
        let saved = (self.emitted, self.done);
        self.emitted = 0;
        self.done = false;
        let rows: Vec<Record> = result.buckets.iter().map(|b| result.row(b)).collect();
        let kept = self.select(ctx, rows.iter().map(|r| (None, r)));
        (self.emitted, self.done) = saved;

        let mut idx = 0;
        result.buckets.retain(|_| {
            let keep = kept.binary_search(&idx).is_ok();
            idx += 1;
            keep
        });
    }
}

fn take_rows(rows: Vec<(String, Record)>, kept: &[usize]) -> RecordSet {
    RecordSet::from_ordered(
        rows.into_iter()
            .enumerate()
            .filter(|(i, _)| kept.binary_search(i).is_ok())
            .map(|(_, row)| row),
    )
}
