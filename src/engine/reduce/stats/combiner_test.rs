use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::engine::errors::{EvalError, ReduceError};
use crate::engine::reduce::expr::{CompareExpr, CompareOp, FieldExpr, ValueExpr};
use crate::engine::reduce::record_set::Record;
use crate::engine::reduce::stats::accumulator::Accumulator;
use crate::engine::reduce::stats::combiner::{combine_record, combine_segment};
use crate::engine::reduce::stats::spec::{AggFunc, AggregateSpec};
use crate::engine::types::FieldValue;
use crate::test_helpers::factories::{RecordSetFactory, SegmentStatsFactory};
use crate::test_helpers::factory::Factory;

#[derive(Debug)]
struct FailingConst;

impl ValueExpr for FailingConst {
    fn fields(&self) -> Vec<String> {
        Vec::new()
    }

    fn evaluate(&self, _row: &Record) -> Result<FieldValue, EvalError> {
        Err(EvalError::Other("divide by zero".into()))
    }
}

#[test]
fn max_http_status_across_single_record_segments() {
    let mut ctx = Factory::context(3);
    let spec = AggregateSpec::field(AggFunc::Max, "http_status");
    let mut acc = Accumulator::for_func(spec.func);

    for status in [200, 404, 500] {
        let segment = SegmentStatsFactory::new()
            .with_rows(vec![json!({"http_status": status})])
            .without_values()
            .create();
        combine_segment(&mut ctx, &spec, &mut acc, &segment).unwrap();
    }

    assert_eq!(acc.finalize(&spec, 100).unwrap(), FieldValue::Int64(500));
    assert!(ctx.errors().is_empty());
}

#[test]
fn stdevp_over_one_segment_uses_raw_values() {
    let mut ctx = Factory::context(1);
    let spec = AggregateSpec::field(AggFunc::Stdevp, "http_status");
    let mut acc = Accumulator::for_func(spec.func);
    let segment = SegmentStatsFactory::numbers("http_status", &[200.0, 404.0, 500.0]);

    combine_segment(&mut ctx, &spec, &mut acc, &segment).unwrap();

    let got = acc.finalize(&spec, 100).unwrap().as_f64().unwrap();
    assert!((got - (46944.0f64 / 3.0).sqrt()).abs() < 1e-9);
}

#[test]
fn field_missing_from_segment_stats_aborts() {
    let mut ctx = Factory::context(1);
    let spec = AggregateSpec::field(AggFunc::Sum, "bytes");
    let mut acc = Accumulator::for_func(spec.func);
    let segment = SegmentStatsFactory::numbers("status", &[1.0]);

    let err = combine_segment(&mut ctx, &spec, &mut acc, &segment).unwrap_err();
    match err {
        ReduceError::MissingFieldStats { agg, field } => {
            assert_eq!(agg, "sum(bytes)");
            assert_eq!(field, "bytes");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn row_level_aggregators_need_raw_values() {
    let mut ctx = Factory::context(1);
    let segment = SegmentStatsFactory::new()
        .with_rows(vec![json!({"v": 1}), json!({"v": 3})])
        .without_values()
        .create();

    let stdev = AggregateSpec::field(AggFunc::Stdev, "v");
    let mut acc = Accumulator::for_func(stdev.func);
    assert!(matches!(
        combine_segment(&mut ctx, &stdev, &mut acc, &segment),
        Err(ReduceError::MissingRawValues { .. })
    ));

    // Distinct sets survive without raw values
    let dc = AggregateSpec::field(AggFunc::Cardinality, "v");
    let mut acc = Accumulator::for_func(dc.func);
    combine_segment(&mut ctx, &dc, &mut acc, &segment).unwrap();
    assert_eq!(acc.finalize(&dc, 100).unwrap(), FieldValue::Int64(2));
}

#[test]
fn predicate_over_segment_counts_matching_rows() {
    let mut ctx = Factory::context(1);
    let spec = AggregateSpec::predicate(
        AggFunc::Count,
        Arc::new(CompareExpr::new("status", CompareOp::Gte, 400)),
    );
    let mut acc = Accumulator::for_func(spec.func);
    let segment = SegmentStatsFactory::new()
        .with_rows(vec![
            json!({"status": 200}),
            json!({"status": 404}),
            json!({"status": 500}),
            json!({"host": "a"}),
        ])
        .create();

    combine_segment(&mut ctx, &spec, &mut acc, &segment).unwrap();

    assert_eq!(acc.finalize(&spec, 100).unwrap(), FieldValue::Int64(2));
    // The row without a status is a soft failure
    assert_eq!(ctx.errors().len(), 1);
    assert_eq!(ctx.errors()[0].stage, "stats");
}

#[test]
fn failing_constant_expression_is_fatal() {
    let mut ctx = Factory::context(1);
    let spec = AggregateSpec::expr(AggFunc::Sum, Arc::new(FailingConst));
    let mut acc = Accumulator::for_func(spec.func);
    let segment = SegmentStatsFactory::numbers("v", &[1.0]);

    assert!(matches!(
        combine_segment(&mut ctx, &spec, &mut acc, &segment),
        Err(ReduceError::ConstantEval(_))
    ));

    let row = RecordSetFactory::record(json!({"v": 1}));
    assert!(combine_record(&mut ctx, &spec, &mut acc, Some("r1"), &row).is_err());
}

#[test]
fn record_evaluation_failures_are_collected_not_fatal() {
    let mut ctx = Factory::context(1);
    let spec = AggregateSpec::expr(AggFunc::Sum, Arc::new(FieldExpr::new("bytes")));
    let mut acc = Accumulator::for_func(spec.func);

    let rows = [json!({"bytes": 10}), json!({"host": "x"}), json!({"bytes": 5})];
    for (i, row) in rows.into_iter().enumerate() {
        let id = format!("r{}", i);
        let record = RecordSetFactory::record(row);
        combine_record(&mut ctx, &spec, &mut acc, Some(&id), &record).unwrap();
    }

    assert_eq!(acc.finalize(&spec, 100).unwrap(), FieldValue::Int64(15));
    assert_eq!(ctx.errors().len(), 1);
    assert_eq!(ctx.errors()[0].record_id.as_deref(), Some("r1"));
}

#[test]
fn segment_split_does_not_change_results() {
    let mut rng = StdRng::seed_from_u64(7);
    let funcs = [
        AggFunc::Count,
        AggFunc::Sum,
        AggFunc::Avg,
        AggFunc::Min,
        AggFunc::Max,
        AggFunc::Range,
        AggFunc::Stdevp,
    ];

    for _round in 0..20 {
        let values: Vec<f64> = (0..60).map(|_| rng.gen_range(-1000..1000) as f64).collect();

        let mut cuts: Vec<usize> = (0..rng.gen_range(1..6))
            .map(|_| rng.gen_range(0..=values.len()))
            .collect();
        cuts.push(0);
        cuts.push(values.len());
        cuts.sort();

        for func in funcs {
            let spec = AggregateSpec::field(func, "v");
            let mut ctx = Factory::context(cuts.len() as u64);

            let mut single = Accumulator::for_func(func);
            for v in &values {
                single.combine(&spec, &FieldValue::number(*v)).unwrap();
            }

            let mut split = Accumulator::for_func(func);
            for w in cuts.windows(2) {
                let segment = SegmentStatsFactory::numbers("v", &values[w[0]..w[1]]);
                combine_segment(&mut ctx, &spec, &mut split, &segment).unwrap();
            }

            let a = single.finalize(&spec, 100).unwrap();
            let b = split.finalize(&spec, 100).unwrap();
            match func {
                AggFunc::Stdevp => {
                    let (a, b) = (a.as_f64().unwrap(), b.as_f64().unwrap());
                    assert!((a - b).abs() < 1e-6, "{:?}: {} vs {}", func, a, b);
                }
                _ => assert_eq!(a, b, "{:?} differs for cuts {:?}", func, cuts),
            }
        }
    }
}

#[test]
fn records_and_segment_stats_agree() {
    let mut ctx = Factory::context(1);
    let spec = AggregateSpec::field(AggFunc::Min, "v");
    let rows = vec![json!({"v": "m"}), json!({"v": "c"}), json!({"v": 42})];

    let mut by_record = Accumulator::for_func(spec.func);
    let records = RecordSetFactory::new().with_rows(rows.clone()).create();
    for id in records.ordered_ids().unwrap() {
        combine_record(&mut ctx, &spec, &mut by_record, Some(&id), records.get(&id).unwrap())
            .unwrap();
    }

    let mut by_segment = Accumulator::for_func(spec.func);
    let segment = SegmentStatsFactory::new().with_rows(rows).create();
    combine_segment(&mut ctx, &spec, &mut by_segment, &segment).unwrap();

    assert_eq!(
        by_record.finalize(&spec, 100).unwrap(),
        by_segment.finalize(&spec, 100).unwrap()
    );
    assert_eq!(
        by_record.finalize(&spec, 100).unwrap(),
        FieldValue::Int64(42)
    );
}
