use tracing::{debug, info};

use crate::engine::errors::{RecordError, ReduceError};
use crate::engine::reduce::bin::span::{BinSpan, auto_numeric_span, auto_time_span};
use crate::engine::reduce::bucket::BucketedResult;
use crate::engine::reduce::context::{QueryContext, SegmentBarrier};
use crate::engine::reduce::record_set::{Record, RecordSet};
use crate::engine::types::FieldValue;
use crate::shared::datetime::time_bucketing::CalendarTimeBucketer;

const STAGE: &str = "bin";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinOptions {
    pub field: String,
    /// Fixed span; `None` detects one from the whole stream
    pub span: Option<BinSpan>,
    /// Upper bound on bins for detection; defaults to `reduce.bin_default_max_bins`
    pub max_bins: Option<u64>,
    /// Lower bound on a detected span
    pub min_span: Option<BinSpan>,
    /// Widen the observed range used for detection
    pub start: Option<f64>,
    pub end: Option<f64>,
    /// Epoch-millisecond origin for sub-day time bins
    pub align_time: Option<i64>,
    /// Output field; defaults to overwriting `field`
    pub output: Option<String>,
}

impl BinOptions {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Self::default()
        }
    }

    pub fn with_span(mut self, span: BinSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_max_bins(mut self, bins: u64) -> Self {
        self.max_bins = Some(bins);
        self
    }

    pub fn with_min_span(mut self, span: BinSpan) -> Self {
        self.min_span = Some(span);
        self
    }

    pub fn with_range(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn aligned_to(mut self, align_ms: i64) -> Self {
        self.align_time = Some(align_ms);
        self
    }

    pub fn output_as(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    pub fn output_field(&self) -> &str {
        self.output.as_deref().unwrap_or(&self.field)
    }
}

/// Observed numeric extent of the binned field.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Extent {
    min: f64,
    max: f64,
}

impl Extent {
    fn widen(extent: Option<Extent>, v: f64) -> Option<Extent> {
        Some(match extent {
            None => Extent { min: v, max: v },
            Some(e) => Extent {
                min: e.min.min(v),
                max: e.max.max(v),
            },
        })
    }
}

/// Replaces a continuous field with the start of its bin.
///
/// With a fixed span every record is binned as it streams past. Without
/// one the stage is a barrier: it needs the global min and max first.
#[derive(Debug)]
pub struct BinStage {
    options: BinOptions,
    buffered: Vec<(String, Record)>,
    extent: Option<Extent>,
    barrier: SegmentBarrier,
}

impl BinStage {
    pub fn new(options: BinOptions) -> Result<Self, ReduceError> {
        if options.field.is_empty() {
            return Err(ReduceError::MalformedStage(
                "bin needs a field".to_string(),
            ));
        }
        if let Some(span) = &options.span {
            span.validate()?;
        }
        if let Some(span) = &options.min_span {
            span.validate()?;
            if matches!(span, BinSpan::Log { .. }) {
                return Err(ReduceError::MalformedStage(
                    "minspan cannot be a log span".to_string(),
                ));
            }
        }
        if options.max_bins == Some(0) {
            return Err(ReduceError::MalformedStage(
                "bins must be positive".to_string(),
            ));
        }
        Ok(Self {
            options,
            buffered: Vec::new(),
            extent: None,
            barrier: SegmentBarrier::new(),
        })
    }

    pub fn options(&self) -> &BinOptions {
        &self.options
    }

    pub fn is_barrier(&self) -> bool {
        self.options.span.is_none()
    }

    /// Bins one segment in place; only valid with a fixed span.
    pub fn process_records(
        &self,
        ctx: &mut QueryContext,
        records: &mut RecordSet,
    ) -> Result<(), ReduceError> {
        let Some(span) = self.options.span else {
            return Err(ReduceError::MalformedStage(
                "bin without a span must buffer until the last segment".to_string(),
            ));
        };
        ctx.add_column(self.options.output_field());
        let bucketer = CalendarTimeBucketer::new(ctx.settings().time.clone());
        for id in records.ordered_ids()? {
            if let Some(record) = records.get_mut(&id) {
                self.bin_record(ctx, &span, &bucketer, Some(&id), record);
            }
        }
        Ok(())
    }

    /// Buffers a segment and widens the observed extent.
    pub fn absorb(&mut self, records: RecordSet) -> Result<(), ReduceError> {
        for (id, record) in records.into_ordered()? {
            if let Some(v) = record.get(&self.options.field).and_then(FieldValue::as_f64) {
                self.extent = Extent::widen(self.extent, v);
            }
            self.buffered.push((id, record));
        }
        Ok(())
    }

    pub fn arrive(&self, ctx: &QueryContext, finishes_segment: bool) -> bool {
        self.barrier.arrive(finishes_segment, ctx.total_segments())
    }

    /// Picks the span from everything seen and bins the buffered records.
    pub fn finalize(&mut self, ctx: &mut QueryContext) -> Result<RecordSet, ReduceError> {
        let span = self.resolve_span(ctx, self.extent)?;
        info!(
            target: "snel_reduce::bin",
            field = %self.options.field,
            span = %span,
            buffered = self.buffered.len(),
            "Bin span resolved"
        );

        ctx.add_column(self.options.output_field());
        let bucketer = CalendarTimeBucketer::new(ctx.settings().time.clone());
        let mut rows = std::mem::take(&mut self.buffered);
        for (id, record) in rows.iter_mut() {
            self.bin_record(ctx, &span, &bucketer, Some(id.as_str()), record);
        }
        Ok(RecordSet::from_ordered(rows))
    }

    /// Bins a group-by column or stat of a materialized result.
    pub fn apply_buckets(
        &self,
        ctx: &mut QueryContext,
        result: &mut BucketedResult,
    ) -> Result<(), ReduceError> {
        let field = self.options.field.as_str();
        let mut extent = None;
        for bucket in &result.buckets {
            if let Some(v) = result.value_of(bucket, field).as_f64() {
                extent = Extent::widen(extent, v);
            }
        }
        let span = self.resolve_span(ctx, extent)?;
        let bucketer = CalendarTimeBucketer::new(ctx.settings().time.clone());

        let output = self.options.output_field().to_string();
        let key_slot = result.group_by.iter().position(|g| *g == output);
        if key_slot.is_none() {
            result.ensure_stat_key(&output);
        }

        let mut buckets = std::mem::take(&mut result.buckets);
        for bucket in &mut buckets {
            let value = result.value_of(bucket, field);
            if value.is_null() {
                continue;
            }
            match span.assign(field, &value, &bucketer, self.options.align_time) {
                Ok(binned) => match key_slot {
                    Some(idx) => bucket.key[idx] = binned.to_string_repr(),
                    None => {
                        bucket.stats.insert(output.clone(), binned);
                    }
                },
                Err(err) => ctx.push_error(RecordError::new(STAGE, None, err.to_string())),
            }
        }
        result.buckets = buckets;
        ctx.add_column(&output);
        Ok(())
    }

    fn bin_record(
        &self,
        ctx: &mut QueryContext,
        span: &BinSpan,
        bucketer: &CalendarTimeBucketer,
        id: Option<&str>,
        record: &mut Record,
    ) {
        let Some(value) = record.get(&self.options.field) else {
            return;
        };
        if value.is_null() {
            return;
        }
        match span.assign(&self.options.field, value, bucketer, self.options.align_time) {
            Ok(binned) => {
                record.insert(self.options.output_field().to_string(), binned);
            }
            Err(err) => ctx.push_error(RecordError::new(STAGE, id, err.to_string())),
        }
    }

    fn resolve_span(
        &self,
        ctx: &QueryContext,
        observed: Option<Extent>,
    ) -> Result<BinSpan, ReduceError> {
        if let Some(span) = self.options.span {
            return Ok(span);
        }
        let max_bins = self
            .options
            .max_bins
            .unwrap_or(ctx.reduce_config().bin_default_max_bins);

        let mut extent = observed;
        if let Some(start) = self.options.start {
            extent = Extent::widen(extent, start);
        }
        if let Some(end) = self.options.end {
            extent = Extent::widen(extent, end);
        }
        let Some(Extent { min, max }) = extent else {
            debug!(target: "snel_reduce::bin", field = %self.options.field, "No numeric values to bin");
            return Ok(BinSpan::Numeric(1.0));
        };

        if self.options.field == ctx.reduce_config().time_field {
            let min_span = match self.options.min_span {
                None => None,
                Some(BinSpan::Time(span)) => Some(span),
                Some(other) => {
                    return Err(ReduceError::MalformedStage(format!(
                        "minspan {} is not a time span",
                        other
                    )));
                }
            };
            let span = auto_time_span(min as i64, max as i64, max_bins, min_span);
            return Ok(BinSpan::Time(span));
        }

        let min_span = match self.options.min_span {
            None => None,
            Some(BinSpan::Numeric(width)) => Some(width),
            Some(other) => {
                return Err(ReduceError::MalformedStage(format!(
                    "minspan {} is not numeric",
                    other
                )));
            }
        };
        Ok(BinSpan::Numeric(auto_numeric_span(min, max, max_bins, min_span)))
    }
}
