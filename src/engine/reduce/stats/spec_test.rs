use std::sync::Arc;

use crate::engine::errors::ReduceError;
use crate::engine::reduce::expr::{CompareExpr, CompareOp, ConstExpr, FieldExpr};
use crate::engine::reduce::stats::spec::{AggFunc, AggSource, AggregateSpec};
use crate::engine::types::FieldValue;
use crate::test_helpers::factories::RecordSetFactory;
use serde_json::json;

#[test]
fn keys_name_function_and_source() {
    assert_eq!(AggregateSpec::count_all().key, "count");
    assert_eq!(
        AggregateSpec::field(AggFunc::Max, "http_status").key,
        "max(http_status)"
    );
    assert_eq!(
        AggregateSpec::field(AggFunc::Cardinality, "user").key,
        "dc(user)"
    );
    let pred = AggregateSpec::predicate(
        AggFunc::Count,
        Arc::new(CompareExpr::new("status", CompareOp::Gte, 400)),
    );
    assert_eq!(pred.key, "count(status>=400)");
    assert_eq!(
        AggregateSpec::field(AggFunc::Avg, "bytes").with_key("avg_bytes").key,
        "avg_bytes"
    );
}

#[test]
fn parse_accepts_aliases() {
    assert_eq!(AggFunc::parse("DC"), Some(AggFunc::Cardinality));
    assert_eq!(AggFunc::parse("distinct_count"), Some(AggFunc::Cardinality));
    assert_eq!(AggFunc::parse("mean"), Some(AggFunc::Avg));
    assert_eq!(AggFunc::parse("median"), None);
}

#[test]
fn validate_rejects_field_less_non_count() {
    let spec = AggregateSpec::new(AggFunc::Sum, AggSource::All);
    assert!(matches!(spec.validate(), Err(ReduceError::MalformedSpec(_))));
    assert!(AggregateSpec::count_all().validate().is_ok());
    assert!(
        AggregateSpec::field(AggFunc::Sum, "")
            .validate()
            .is_err()
    );
}

#[test]
fn evaluate_reads_fields_expressions_and_predicates() {
    let row = RecordSetFactory::record(json!({"status": 503, "host": "a"}));

    let field = AggregateSpec::field(AggFunc::Max, "status");
    assert_eq!(field.evaluate(&row).unwrap(), Some(FieldValue::Int64(503)));

    let missing = AggregateSpec::field(AggFunc::Max, "latency");
    assert_eq!(missing.evaluate(&row).unwrap(), None);

    let expr = AggregateSpec::expr(AggFunc::Max, Arc::new(FieldExpr::new("latency")));
    assert!(expr.evaluate(&row).unwrap_err().is_null_field());

    let pred = AggregateSpec::predicate(
        AggFunc::Count,
        Arc::new(CompareExpr::new("status", CompareOp::Gte, 500)),
    );
    assert_eq!(pred.evaluate(&row).unwrap(), Some(FieldValue::Int64(1)));
}

#[test]
fn constant_sources_are_detected() {
    let constant = AggregateSpec::expr(AggFunc::Sum, Arc::new(ConstExpr::new(2)));
    assert!(constant.source.is_constant());
    let field = AggregateSpec::expr(AggFunc::Sum, Arc::new(FieldExpr::new("x")));
    assert!(!field.source.is_constant());
    assert!(!AggregateSpec::count_all().source.is_constant());
}
