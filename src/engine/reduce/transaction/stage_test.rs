use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::engine::reduce::expr::{CompareExpr, CompareOp};
use crate::engine::reduce::record_set::RecordSet;
use crate::engine::reduce::transaction::grouper::TransactionOptions;
use crate::engine::reduce::transaction::stage::TransactionStage;
use crate::engine::types::FieldValue;
use crate::test_helpers::factories::RecordSetFactory;
use crate::test_helpers::factory::Factory;

fn action_is(action: &str) -> Arc<CompareExpr> {
    Arc::new(CompareExpr::new("action", CompareOp::Eq, action))
}

fn member_values(records: &RecordSet, id: &str, field: &str) -> Vec<serde_json::Value> {
    records.get(id).unwrap()["event"]
        .as_list()
        .unwrap()
        .iter()
        .map(|raw| {
            let member: serde_json::Value = serde_json::from_str(raw).unwrap();
            member[field].clone()
        })
        .collect()
}

#[test]
fn without_an_end_the_stage_holds_everything_until_the_last_segment() {
    let mut ctx = Factory::context(2);
    let mut stage = TransactionStage::new(&ctx, TransactionOptions::new(vec!["user".into()]));
    assert!(stage.is_barrier());

    let mut segments = RecordSetFactory::new()
        .with_rows(vec![
            json!({"user": "a", "timestamp": 30}),
            json!({"user": "b", "timestamp": 10}),
            json!({"user": "a", "timestamp": 20}),
            json!({"user": "b", "timestamp": 40}),
            json!({"user": "a", "timestamp": 50}),
        ])
        .create_segments(&[3, 2])
        .into_iter();

    stage.absorb(segments.next().unwrap()).unwrap();
    assert!(!stage.arrive(&ctx, true));
    assert!(stage.finish_segment(&mut ctx, false).unwrap().is_empty());

    stage.absorb(segments.next().unwrap()).unwrap();
    assert!(stage.arrive(&ctx, true));
    let out = stage.finish_segment(&mut ctx, true).unwrap();

    assert_eq!(out.ordered_ids().unwrap(), vec!["rec-1", "rec-2"]);
    let b = out.get("rec-1").unwrap();
    assert_eq!(b["timestamp"], FieldValue::Int64(10));
    assert_eq!(b["duration"], FieldValue::Int64(30));
    assert_eq!(b["eventcount"], FieldValue::Int64(2));
    assert_eq!(b["user"], FieldValue::from("b"));

    let a = out.get("rec-2").unwrap();
    assert_eq!(a["eventcount"], FieldValue::Int64(3));
    assert_eq!(a["duration"], FieldValue::Int64(30));
    assert_eq!(
        member_values(&out, "rec-2", "timestamp"),
        vec![json!(20), json!(30), json!(50)]
    );
    assert!(ctx.errors().is_empty());
}

#[test]
fn with_an_end_closed_groups_stream_out_per_segment() {
    let mut ctx = Factory::context(2);
    let options = TransactionOptions::new(vec!["user".into()])
        .starting_with(action_is("login"))
        .ending_with(action_is("logout"));
    let mut stage = TransactionStage::new(&ctx, options);
    assert!(!stage.is_barrier());

    let mut segments = RecordSetFactory::new()
        .with_rows(vec![
            json!({"user": "a", "action": "logout", "timestamp": 10}),
            json!({"user": "a", "action": "login", "timestamp": 0}),
            json!({"user": "b", "action": "login", "timestamp": 5}),
            json!({"user": "b", "action": "view", "timestamp": 20}),
        ])
        .create_segments(&[3, 1])
        .into_iter();

    stage.absorb(segments.next().unwrap()).unwrap();
    let first = stage.finish_segment(&mut ctx, false).unwrap();
    assert_eq!(first.ordered_ids().unwrap(), vec!["rec-1"]);
    assert_eq!(
        member_values(&first, "rec-1", "action"),
        vec![json!("login"), json!("logout")]
    );
    assert_eq!(
        ctx.final_columns(),
        vec!["timestamp", "duration", "eventcount", "event", "transactionKey", "user"]
    );

    // b never logs out: its open group is dropped at the end
    stage.absorb(segments.next().unwrap()).unwrap();
    let last = stage.finish_segment(&mut ctx, true).unwrap();
    assert!(last.is_empty());
    assert_eq!(stage.grouper().pending_events(), 2);
}

#[test]
fn records_without_a_timestamp_are_reported_and_left_out() {
    let mut ctx = Factory::context(1);
    let mut stage = TransactionStage::new(&ctx, TransactionOptions::new(vec!["user".into()]));
    stage
        .absorb(
            RecordSetFactory::new()
                .with_rows(vec![
                    json!({"user": "a", "timestamp": 1}),
                    json!({"user": "a"}),
                    json!({"user": "a", "timestamp": "soon"}),
                ])
                .create(),
        )
        .unwrap();
    let out = stage.finish_segment(&mut ctx, true).unwrap();

    assert_eq!(out.len(), 1);
    assert_eq!(out.get("rec-0").unwrap()["eventcount"], FieldValue::Int64(1));
    assert_eq!(ctx.errors().len(), 2);
    assert!(ctx.errors().iter().all(|e| e.stage == "transaction"));
}

#[test]
fn empty_fields_group_by_the_time_field() {
    let mut ctx = Factory::context(1);
    let options = TransactionOptions::new(Vec::new()).with_time_field("t");
    let mut stage = TransactionStage::new(&ctx, options);
    assert_eq!(stage.grouper().fields(), ["t".to_string()]);
    assert_eq!(
        stage.output_columns(),
        vec!["timestamp", "duration", "eventcount", "event", "transactionKey", "t"]
    );

    stage
        .absorb(
            RecordSetFactory::new()
                .with_rows(vec![json!({"t": 7}), json!({"t": 3}), json!({"t": 7})])
                .create(),
        )
        .unwrap();
    let out = stage.finish_segment(&mut ctx, true).unwrap();
    assert_eq!(out.ordered_ids().unwrap(), vec!["rec-1", "rec-0"]);
    assert_eq!(out.get("rec-0").unwrap()["eventcount"], FieldValue::Int64(2));
}

#[test]
fn every_record_is_grouped_skipped_or_pending_exactly_once() {
    crate::logging::init_for_tests();
    let mut rng = StdRng::seed_from_u64(29);
    let users = ["u1", "u2", "u3", "u4"];
    let actions = ["login", "view", "view", "logout"];

    for round in 0..16 {
        let total = 80;
        let rows: Vec<serde_json::Value> = (0..total)
            .map(|n| {
                json!({
                    "n": n,
                    "timestamp": n * 10,
                    "user": users[rng.gen_range(0..users.len())],
                    "action": actions[rng.gen_range(0..actions.len())],
                })
            })
            .collect();

        let mut sizes = Vec::new();
        let mut left = rows.len();
        while left > 0 {
            let size = rng.gen_range(1..=left.min(20));
            sizes.push(size);
            left -= size;
        }

        let mut ctx = Factory::context(sizes.len() as u64);
        let mut options =
            TransactionOptions::new(vec!["user".into()]).starting_with(action_is("login"));
        if round % 2 == 1 {
            options = options.ending_with(action_is("logout"));
        }
        let mut stage = TransactionStage::new(&ctx, options);

        let mut seen = Vec::new();
        let segments = RecordSetFactory::new().with_rows(rows).create_segments(&sizes);
        let count = segments.len();
        for (i, segment) in segments.into_iter().enumerate() {
            // Arrival order inside a segment must not matter
            let mut rows = segment.into_ordered().unwrap();
            rows.shuffle(&mut rng);
            stage.absorb(RecordSet::from_ordered(rows)).unwrap();
            stage.arrive(&ctx, true);

            let out = stage.finish_segment(&mut ctx, i + 1 == count).unwrap();
            for id in out.ordered_ids().unwrap() {
                for n in member_values(&out, &id, "n") {
                    seen.push(n.as_u64().unwrap());
                }
            }
        }

        let grouper = stage.grouper();
        let unaccounted = grouper.skipped() as usize + grouper.pending_events();
        assert_eq!(seen.len() + unaccounted, total as usize);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len() + unaccounted, total as usize);
        assert!(ctx.errors().is_empty());
    }
}
