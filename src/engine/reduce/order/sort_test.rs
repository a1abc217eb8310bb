use serde_json::json;

use crate::engine::errors::ReduceError;
use crate::engine::reduce::order::sort::SortStage;
use crate::engine::reduce::order::sort_key::SortElement;
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

#[test]
fn sorts_across_segments_and_releases_at_barrier() {
    let ctx = Factory::context(2);
    let mut stage = SortStage::new(vec![SortElement::desc("bytes")], 3).unwrap();

    let segments = RecordSetFactory::new()
        .with_rows(vec![
            json!({"bytes": 5}),
            json!({"bytes": 50}),
            json!({"bytes": "n/a"}),
            json!({"bytes": 20}),
            json!({"bytes": 70}),
        ])
        .create_segments(&[3, 2]);
    let mut segments = segments.into_iter();

    stage.absorb(segments.next().unwrap()).unwrap();
    assert!(!stage.arrive(&ctx, true));
    stage.absorb(segments.next().unwrap()).unwrap();
    assert!(stage.arrive(&ctx, true));

    // Descending flips the rank order too: strings come before numbers
    let out = stage.finalize();
    assert_eq!(
        values(&out, "bytes"),
        vec![FieldValue::from("n/a"), FieldValue::Int64(70), FieldValue::Int64(50)]
    );
}

#[test]
fn absent_values_sort_last_in_both_directions() {
    for element in [SortElement::asc("v"), SortElement::desc("v")] {
        let mut stage = SortStage::new(vec![element], 10).unwrap();
        let records = RecordSetFactory::new()
            .with_rows(vec![json!({"x": 1}), json!({"v": "b"}), json!({"v": 3})])
            .create();
        stage.absorb(records).unwrap();
        let out = stage.finalize();
        assert_eq!(values(&out, "v").last(), Some(&FieldValue::Null));
    }
}

#[test]
fn equal_keys_keep_arrival_order() {
    let mut stage = SortStage::new(vec![SortElement::asc("k")], 10).unwrap();
    let records = RecordSetFactory::new()
        .with_rows(vec![
            json!({"k": 1, "n": "first"}),
            json!({"k": 0, "n": "zero"}),
            json!({"k": 1, "n": "second"}),
        ])
        .create();
    stage.absorb(records).unwrap();
    let out = stage.finalize();
    assert_eq!(
        values(&out, "n"),
        vec![
            FieldValue::from("zero"),
            FieldValue::from("first"),
            FieldValue::from("second")
        ]
    );
}

#[test]
fn sort_with_limit_is_idempotent() {
    let elements = vec![SortElement::asc("host"), SortElement::desc("bytes")];
    let rows = vec![
        json!({"host": "b", "bytes": 1}),
        json!({"host": "a", "bytes": 3}),
        json!({"host": "c", "bytes": 2}),
        json!({"host": "a", "bytes": 9}),
        json!({"bytes": 4}),
    ];

    let mut first = SortStage::new(elements.clone(), 4).unwrap();
    first.absorb(RecordSetFactory::new().with_rows(rows).create()).unwrap();
    let once = first.finalize();

    let mut second = SortStage::new(elements, 4).unwrap();
    second.absorb(once.clone()).unwrap();
    let twice = second.finalize();

    assert_eq!(values(&once, "bytes"), values(&twice, "bytes"));
    assert_eq!(values(&once, "host"), values(&twice, "host"));
    assert_eq!(
        values(&once, "bytes"),
        vec![
            FieldValue::Int64(9),
            FieldValue::Int64(3),
            FieldValue::Int64(1),
            FieldValue::Int64(2)
        ]
    );
}

#[test]
fn colliding_ids_from_different_segments_are_kept_apart() {
    let mut stage = SortStage::new(vec![SortElement::asc("v")], 10).unwrap();
    for v in [2, 1] {
        let mut records = RecordSet::new();
        records.insert("0", RecordSetFactory::record(json!({"v": v})), 0);
        stage.absorb(records).unwrap();
    }
    let out = stage.finalize();
    assert_eq!(out.len(), 2);
    assert_eq!(out.ordered_ids().unwrap(), vec!["0".to_string(), "0#1".into()]);
}

#[test]
fn buckets_sort_in_place() {
    let stage = SortStage::new(vec![SortElement::desc("count")], 2).unwrap();
    let mut result = BucketFactory::new()
        .with_group_by(&["host"])
        .with_bucket(&["a"], json!({"count": 3}), 3)
        .with_bucket(&["b"], json!({"count": 9}), 9)
        .with_bucket(&["c"], json!({"count": 5}), 5)
        .create();
    stage.sort_buckets(&mut result);

    let keys: Vec<&str> = result.buckets.iter().map(|b| b.key[0].as_str()).collect();
    assert_eq!(keys, vec!["b", "c"]);
}

#[test]
fn rejects_empty_spec() {
    assert!(matches!(
        SortStage::new(vec![], 10),
        Err(ReduceError::MalformedStage(_))
    ));
    assert!(SortStage::new(vec![SortElement::asc("v")], 0).is_err());
}
