use std::sync::Arc;

use serde_json::json;

use crate::engine::reduce::expr::{CompareExpr, CompareOp};
use crate::engine::reduce::order::head::HeadStage;
use crate::engine::reduce::record_set::RecordSet;
use crate::engine::types::FieldValue;
use crate::test_helpers::factories::{BucketFactory, RecordSetFactory};
use crate::test_helpers::factory::Factory;

fn values(records: &RecordSet, field: &str) -> Vec<FieldValue> {
    records
        .ordered_ids()
        .unwrap()
        .iter()
        .map(|id| records.get(id).unwrap().get(field).cloned().unwrap_or_default())
        .collect()
}

fn below_100() -> Arc<CompareExpr> {
    Arc::new(CompareExpr::new("v", CompareOp::Lt, 100))
}

fn rows() -> Vec<serde_json::Value> {
    vec![
        json!({"v": 1}),
        json!({"v": 2}),
        json!({"other": "x"}),
        json!({"v": 3}),
        json!({"v": 500}),
        json!({"v": 4}),
    ]
}

fn run_predicate(stage: &mut HeadStage) -> Vec<FieldValue> {
    let mut ctx = Factory::context(1);
    stage
        .buffer(RecordSetFactory::new().with_rows(rows()).create())
        .unwrap();
    assert!(stage.arrive(&ctx, true));
    let out = stage.finalize(&mut ctx);
    values(&out, "v")
}

#[test]
fn count_head_carries_across_segments() {
    let mut ctx = Factory::context(2);
    let mut stage = HeadStage::count(3);
    assert!(!stage.is_barrier());

    let segments = RecordSetFactory::new()
        .with_numbers("v", &[1.0, 2.0, 3.0, 4.0, 5.0])
        .create_segments(&[2, 3]);
    let mut segments = segments.into_iter();

    let first = stage.apply_records(&mut ctx, segments.next().unwrap()).unwrap();
    assert_eq!(first.len(), 2);
    let second = stage.apply_records(&mut ctx, segments.next().unwrap()).unwrap();
    assert_eq!(values(&second, "v"), vec![FieldValue::Int64(3)]);
}

#[test]
fn predicate_stops_at_first_null_by_default() {
    let mut stage = HeadStage::predicate(below_100(), false, false);
    assert!(stage.is_barrier());
    assert_eq!(
        run_predicate(&mut stage),
        vec![FieldValue::Int64(1), FieldValue::Int64(2)]
    );
}

#[test]
fn keep_null_retains_and_continues() {
    let mut stage = HeadStage::predicate(below_100(), true, false);
    assert_eq!(
        run_predicate(&mut stage),
        vec![
            FieldValue::Int64(1),
            FieldValue::Int64(2),
            FieldValue::Null,
            FieldValue::Int64(3)
        ]
    );
}

#[test]
fn keep_last_retains_the_row_that_stops() {
    let mut stage = HeadStage::predicate(below_100(), false, true);
    assert_eq!(
        run_predicate(&mut stage),
        vec![FieldValue::Int64(1), FieldValue::Int64(2), FieldValue::Null]
    );

    let mut stage = HeadStage::predicate(below_100(), true, true);
    assert_eq!(
        run_predicate(&mut stage),
        vec![
            FieldValue::Int64(1),
            FieldValue::Int64(2),
            FieldValue::Null,
            FieldValue::Int64(3),
            FieldValue::Int64(500)
        ]
    );
}

#[test]
fn max_rows_caps_predicate_head() {
    let mut stage = HeadStage::predicate(below_100(), true, false).with_max_rows(2);
    assert_eq!(
        run_predicate(&mut stage),
        vec![FieldValue::Int64(1), FieldValue::Int64(2)]
    );
}

#[test]
fn bucket_results_are_cut_independently() {
    let mut ctx = Factory::context(1);
    let mut stage = HeadStage::count(1);
    let build = || {
        BucketFactory::new()
            .with_group_by(&["host"])
            .with_bucket(&["a"], json!({"count": 1}), 1)
            .with_bucket(&["b"], json!({"count": 2}), 2)
            .create()
    };

    let mut first = build();
    stage.apply_buckets(&mut ctx, &mut first);
    let mut second = build();
    stage.apply_buckets(&mut ctx, &mut second);

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(second.buckets[0].key, vec!["a"]);
}
