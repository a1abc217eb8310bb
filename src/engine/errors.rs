use std::fmt;

use thiserror::Error;
use tracing::{debug, error};

/// Hard failures: they abort the current stage and the query.
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("Field '{field}' referenced by aggregator '{agg}' is missing from segment stats")]
    MissingFieldStats { agg: String, field: String },

    #[error("Aggregator '{agg}' needs raw per-record values for field '{field}'")]
    MissingRawValues { agg: String, field: String },

    #[error("Malformed aggregator spec: {0}")]
    MalformedSpec(String),

    #[error("Malformed stage options: {0}")]
    MalformedStage(String),

    #[error("Accumulator for '{key}' does not hold a {expected} state")]
    AccumulatorMismatch { key: String, expected: &'static str },

    #[error("Division by zero in {0}")]
    DivisionByZero(String),

    #[error("Record '{0}' has no output position")]
    MissingPosition(String),

    #[error("Failed to encode values as JSON: {0}")]
    KeyEncoding(#[from] serde_json::Error),

    #[error("Constant expression evaluation failed: {0}")]
    ConstantEval(#[from] EvalError),

    #[error("Invalid timestamp {0} for calendar bucketing")]
    InvalidTimestamp(i64),
}

impl ReduceError {
    pub fn log_error(&self) {
        match self {
            ReduceError::MissingFieldStats { agg, field } => {
                error!("Missing field stats for {} in {}", field, agg);
                debug!("Missing field stats details: {:?}", self);
            }
            ReduceError::MissingRawValues { agg, field } => {
                error!("Missing raw values for {} in {}", field, agg);
                debug!("Missing raw values details: {:?}", self);
            }
            ReduceError::MalformedSpec(e) => {
                error!("Malformed aggregator spec: {}", e);
                debug!("Malformed aggregator spec details: {}", e);
            }
            ReduceError::MalformedStage(e) => {
                error!("Malformed stage options: {}", e);
                debug!("Malformed stage options details: {}", e);
            }
            ReduceError::AccumulatorMismatch { key, expected } => {
                error!("Accumulator {} is not a {} state", key, expected);
                debug!("Accumulator mismatch details: {:?}", self);
            }
            ReduceError::DivisionByZero(e) => {
                error!("Division by zero: {}", e);
            }
            ReduceError::MissingPosition(id) => {
                error!("Record {} has no output position", id);
            }
            ReduceError::KeyEncoding(e) => {
                error!("JSON encoding failed: {}", e);
                debug!("JSON encoding details: {:?}", e);
            }
            ReduceError::ConstantEval(e) => {
                error!("Constant expression evaluation failed: {}", e);
                debug!("Constant expression details: {:?}", e);
            }
            ReduceError::InvalidTimestamp(ts) => {
                error!("Invalid timestamp {} for calendar bucketing", ts);
            }
        }
    }
}

/// Failure reported by an expression evaluator for a single row.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Field '{0}' is absent")]
    NullField(String),

    #[error("Value '{value}' of field '{field}' is not {expected}")]
    Type {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error("{0}")]
    Other(String),
}

impl EvalError {
    pub fn is_null_field(&self) -> bool {
        matches!(self, EvalError::NullField(_))
    }
}

/// Soft failure recorded against one row; the row is skipped for that stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordError {
    pub stage: &'static str,
    pub record_id: Option<String>,
    pub message: String,
}

impl RecordError {
    pub fn new(stage: &'static str, record_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            stage,
            record_id: record_id.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record_id {
            Some(id) => write!(f, "{} [{}]: {}", self.stage, id, self.message),
            None => write!(f, "{}: {}", self.stage, self.message),
        }
    }
}
