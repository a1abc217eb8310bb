use std::fmt;
use std::sync::Arc;

use crate::engine::errors::{EvalError, ReduceError};
use crate::engine::reduce::expr::{BoolExpr, ValueExpr};
use crate::engine::reduce::record_set::Record;
use crate::engine::types::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Range,
    Stdev,
    Stdevp,
    Cardinality,
    Values,
    List,
}

impl AggFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Range => "range",
            AggFunc::Stdev => "stdev",
            AggFunc::Stdevp => "stdevp",
            AggFunc::Cardinality => "dc",
            AggFunc::Values => "values",
            AggFunc::List => "list",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" | "c" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "avg" | "mean" => Some(AggFunc::Avg),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "range" => Some(AggFunc::Range),
            "stdev" => Some(AggFunc::Stdev),
            "stdevp" => Some(AggFunc::Stdevp),
            "dc" | "distinct_count" | "cardinality" => Some(AggFunc::Cardinality),
            "values" => Some(AggFunc::Values),
            "list" => Some(AggFunc::List),
            _ => None,
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an aggregator reads from each record.
#[derive(Debug, Clone)]
pub enum AggSource {
    /// Every record, no field (`count`)
    All,
    Field(String),
    Expr(Arc<dyn ValueExpr>),
    /// Boolean expression; true contributes 1, false 0
    Predicate(Arc<dyn BoolExpr>),
}

impl AggSource {
    pub fn fields(&self) -> Vec<String> {
        match self {
            AggSource::All => Vec::new(),
            AggSource::Field(f) => vec![f.clone()],
            AggSource::Expr(e) => e.fields(),
            AggSource::Predicate(p) => p.fields(),
        }
    }

    fn label(&self) -> Option<String> {
        match self {
            AggSource::All => None,
            AggSource::Field(f) => Some(f.clone()),
            AggSource::Expr(e) => Some(e.label()),
            AggSource::Predicate(p) => Some(p.label()),
        }
    }

    /// Expression sources that read no field at all.
    pub fn is_constant(&self) -> bool {
        matches!(self, AggSource::Expr(_) | AggSource::Predicate(_)) && self.fields().is_empty()
    }
}

/// One requested statistic; `key` names both its running state and its output column.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub func: AggFunc,
    pub source: AggSource,
    pub key: String,
}

impl AggregateSpec {
    pub fn new(func: AggFunc, source: AggSource) -> Self {
        let key = match source.label() {
            Some(label) => format!("{}({})", func, label),
            None => func.to_string(),
        };
        Self { func, source, key }
    }

    pub fn count_all() -> Self {
        Self::new(AggFunc::Count, AggSource::All)
    }

    pub fn field(func: AggFunc, field: impl Into<String>) -> Self {
        Self::new(func, AggSource::Field(field.into()))
    }

    pub fn expr(func: AggFunc, expr: Arc<dyn ValueExpr>) -> Self {
        Self::new(func, AggSource::Expr(expr))
    }

    pub fn predicate(func: AggFunc, predicate: Arc<dyn BoolExpr>) -> Self {
        Self::new(func, AggSource::Predicate(predicate))
    }

    /// Renames the output column (`... as name`).
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn validate(&self) -> Result<(), ReduceError> {
        if self.key.is_empty() {
            return Err(ReduceError::MalformedSpec(format!(
                "{} has an empty output key",
                self.func
            )));
        }
        if matches!(self.source, AggSource::All) && self.func != AggFunc::Count {
            return Err(ReduceError::MalformedSpec(format!(
                "{} needs a field or expression",
                self.func
            )));
        }
        if let AggSource::Field(f) = &self.source {
            if f.is_empty() {
                return Err(ReduceError::MalformedSpec(format!(
                    "{} reads an empty field name",
                    self.key
                )));
            }
        }
        Ok(())
    }

    pub fn fields(&self) -> Vec<String> {
        self.source.fields()
    }

    /// Value this aggregator reads from one record.
    ///
    /// `Ok(None)` means the record has nothing for this aggregator: the field is
    /// absent. Expression failures are returned to the caller.
    pub fn evaluate(&self, row: &Record) -> Result<Option<FieldValue>, EvalError> {
        match &self.source {
            AggSource::All => Ok(Some(FieldValue::Int64(1))),
            AggSource::Field(f) => Ok(row.get(f).filter(|v| !v.is_null()).cloned()),
            AggSource::Expr(e) => e.evaluate(row).map(Some),
            AggSource::Predicate(p) => p
                .evaluate_bool(row)
                .map(|b| Some(FieldValue::Int64(b as i64))),
        }
    }
}
