use tracing::{debug, trace};

use crate::engine::errors::{RecordError, ReduceError};
use crate::engine::reduce::context::QueryContext;
use crate::engine::reduce::record_set::Record;
use crate::engine::reduce::stats::accumulator::Accumulator;
use crate::engine::reduce::stats::segment_stats::SegmentStats;
use crate::engine::reduce::stats::spec::{AggFunc, AggSource, AggregateSpec};

const STAGE: &str = "stats";

/// Folds one record into `acc`.
///
/// An evaluation failure on a record is soft: it is recorded on the context
/// and the record contributes nothing. A failing constant expression aborts.
pub fn combine_record(
    ctx: &mut QueryContext,
    spec: &AggregateSpec,
    acc: &mut Accumulator,
    record_id: Option<&str>,
    row: &Record,
) -> Result<(), ReduceError> {
    match spec.evaluate(row) {
        Ok(Some(value)) => acc.combine(spec, &value),
        Ok(None) => Ok(()),
        Err(err) if spec.source.is_constant() => Err(ReduceError::ConstantEval(err)),
        Err(err) => {
            ctx.push_error(RecordError::new(
                STAGE,
                record_id,
                format!("{}: {}", spec.key, err),
            ));
            Ok(())
        }
    }
}

/// Folds one segment's partial statistics into `acc`.
pub fn combine_segment(
    ctx: &mut QueryContext,
    spec: &AggregateSpec,
    acc: &mut Accumulator,
    segment: &SegmentStats,
) -> Result<(), ReduceError> {
    if tracing::enabled!(tracing::Level::TRACE) {
        trace!(
            target: "snel_reduce::stats",
            agg = %spec.key,
            records = segment.record_count,
            "Combining segment stats"
        );
    }

    match &spec.source {
        AggSource::All => acc.add_count(spec, segment.record_count)?,
        AggSource::Field(field) => {
            let stats = segment
                .field(field)
                .ok_or_else(|| ReduceError::MissingFieldStats {
                    agg: spec.key.clone(),
                    field: field.clone(),
                })?;
            acc.absorb_field_stats(spec, field, stats)?;
        }
        AggSource::Expr(_) | AggSource::Predicate(_) if spec.source.is_constant() => {
            let value = spec
                .evaluate(&Record::new())
                .map_err(ReduceError::ConstantEval)?;
            if let Some(value) = value {
                if spec.func == AggFunc::Count && !matches!(spec.source, AggSource::Predicate(_)) {
                    acc.add_count(spec, segment.record_count)?;
                } else {
                    for _ in 0..segment.record_count {
                        acc.combine(spec, &value)?;
                    }
                }
            }
        }
        AggSource::Expr(_) | AggSource::Predicate(_) => {
            let rows = segment.rows(&spec.key, &spec.fields())?;
            debug!(
                target: "snel_reduce::stats",
                agg = %spec.key,
                rows = rows.len(),
                "Evaluating expression over raw segment values"
            );
            for row in &rows {
                combine_record(ctx, spec, acc, None, row)?;
            }
        }
    }

    acc.flush();
    Ok(())
}
