use serde_json::json;

use crate::engine::errors::ReduceError;
use crate::engine::reduce::stats::spec::{AggFunc, AggregateSpec};
use crate::engine::reduce::stats::stage::StatsStage;
use crate::engine::types::FieldValue;
use crate::test_helpers::factories::{RecordSetFactory, SegmentStatsFactory};
use crate::test_helpers::factory::Factory;

#[test]
fn groups_records_and_orders_buckets_by_key() {
    let mut ctx = Factory::context(2);
    let mut stage = StatsStage::new(
        vec![
            AggregateSpec::count_all(),
            AggregateSpec::field(AggFunc::Avg, "bytes"),
        ],
        vec!["host".into()],
    )
    .unwrap();

    let segments = RecordSetFactory::new()
        .with_rows(vec![
            json!({"host": "web-2", "bytes": 100}),
            json!({"host": "web-1", "bytes": 10}),
            json!({"host": "web-2", "bytes": 300}),
            json!({"bytes": 7}),
        ])
        .create_segments(&[2, 2]);

    stage.absorb_records(&mut ctx, &segments[0]).unwrap();
    assert!(!stage.arrive(&ctx, true));
    stage.absorb_records(&mut ctx, &segments[1]).unwrap();
    assert!(stage.arrive(&ctx, true));

    let result = stage.finalize(&mut ctx).unwrap();
    assert_eq!(result.group_by, vec!["host".to_string()]);
    assert_eq!(result.stat_keys, vec!["count", "avg(bytes)"]);
    assert_eq!(result.len(), 2);

    let first = &result.buckets[0];
    assert_eq!(first.key, vec!["web-1"]);
    assert_eq!(first.count, 1);
    assert_eq!(first.stats["avg(bytes)"], FieldValue::Float64(10.0));

    let second = &result.buckets[1];
    assert_eq!(second.key, vec!["web-2"]);
    assert_eq!(second.count, 2);
    assert_eq!(second.stats["count"], FieldValue::Int64(2));
    assert_eq!(second.stats["avg(bytes)"], FieldValue::Float64(200.0));

    assert_eq!(
        ctx.final_columns(),
        vec!["host".to_string(), "count".into(), "avg(bytes)".into()]
    );
}

#[test]
fn numeric_group_keys_sort_numerically() {
    let mut ctx = Factory::context(1);
    let mut stage =
        StatsStage::new(vec![AggregateSpec::count_all()], vec!["status".into()]).unwrap();
    let records = RecordSetFactory::new()
        .with_rows(vec![
            json!({"status": 500}),
            json!({"status": 1000}),
            json!({"status": 404}),
        ])
        .create();
    stage.absorb_records(&mut ctx, &records).unwrap();

    let result = stage.finalize(&mut ctx).unwrap();
    let keys: Vec<&str> = result.buckets.iter().map(|b| b.key[0].as_str()).collect();
    assert_eq!(keys, vec!["404", "500", "1000"]);
}

#[test]
fn segment_stats_feed_an_ungrouped_stage() {
    let mut ctx = Factory::context(2);
    let mut stage = StatsStage::new(
        vec![
            AggregateSpec::count_all(),
            AggregateSpec::field(AggFunc::Max, "http_status"),
            AggregateSpec::field(AggFunc::Sum, "bytes"),
        ],
        vec![],
    )
    .unwrap();

    let a = SegmentStatsFactory::new()
        .with_rows(vec![
            json!({"http_status": 200, "bytes": 5}),
            json!({"http_status": 404, "bytes": 7}),
        ])
        .without_values()
        .create();
    let b = SegmentStatsFactory::new()
        .with_rows(vec![json!({"http_status": 500, "bytes": 1})])
        .without_values()
        .create();

    stage.absorb_segment_stats(&mut ctx, &a).unwrap();
    stage.absorb_segment_stats(&mut ctx, &b).unwrap();
    let result = stage.finalize(&mut ctx).unwrap();

    assert_eq!(result.len(), 1);
    let bucket = &result.buckets[0];
    assert!(bucket.key.is_empty());
    assert_eq!(bucket.count, 3);
    assert_eq!(bucket.stats["count"], FieldValue::Int64(3));
    assert_eq!(bucket.stats["max(http_status)"], FieldValue::Int64(500));
    assert_eq!(bucket.stats["sum(bytes)"], FieldValue::Int64(13));
}

#[test]
fn empty_input_yields_one_bucket_with_absent_average() {
    let mut ctx = Factory::context(1);
    let mut stage = StatsStage::new(
        vec![
            AggregateSpec::count_all(),
            AggregateSpec::field(AggFunc::Avg, "bytes"),
        ],
        vec![],
    )
    .unwrap();

    let result = stage.finalize(&mut ctx).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.buckets[0].stats["count"], FieldValue::Int64(0));
    assert_eq!(result.buckets[0].stats["avg(bytes)"], FieldValue::Null);
    assert_eq!(ctx.errors().len(), 1);
}

#[test]
fn grouped_stage_rejects_segment_stats() {
    let mut ctx = Factory::context(1);
    let mut stage =
        StatsStage::new(vec![AggregateSpec::count_all()], vec!["host".into()]).unwrap();
    let segment = SegmentStatsFactory::numbers("v", &[1.0]);
    assert!(matches!(
        stage.absorb_segment_stats(&mut ctx, &segment),
        Err(ReduceError::MalformedStage(_))
    ));
}

#[test]
fn duplicate_output_keys_are_rejected() {
    let err = StatsStage::new(
        vec![
            AggregateSpec::field(AggFunc::Max, "v"),
            AggregateSpec::field(AggFunc::Max, "v"),
        ],
        vec![],
    )
    .unwrap_err();
    assert!(matches!(err, ReduceError::MalformedSpec(_)));

    assert!(StatsStage::new(vec![], vec![]).is_err());
}

#[test]
fn list_cap_comes_from_settings() {
    let mut settings = crate::shared::config::Settings::default();
    settings.reduce.list_max_size = 2;
    let mut ctx = Factory::context_with(1, settings);
    let mut stage =
        StatsStage::new(vec![AggregateSpec::field(AggFunc::List, "user")], vec![]).unwrap();
    let records = RecordSetFactory::new()
        .with_rows(vec![
            json!({"user": "ann"}),
            json!({"user": "bob"}),
            json!({"user": "cid"}),
        ])
        .create();
    stage.absorb_records(&mut ctx, &records).unwrap();

    let result = stage.finalize(&mut ctx).unwrap();
    assert_eq!(
        result.buckets[0].stats["list(user)"],
        FieldValue::Utf8List(vec!["ann".into(), "bob".into()])
    );
}
