use std::cmp::Ordering;
use std::fmt;

use crate::engine::errors::EvalError;
use crate::engine::reduce::record_set::Record;
use crate::engine::types::FieldValue;

/// Computes one scalar from a record.
pub trait ValueExpr: fmt::Debug + Send + Sync {
    /// Fields the expression reads; empty for constant expressions.
    fn fields(&self) -> Vec<String>;

    fn evaluate(&self, row: &Record) -> Result<FieldValue, EvalError>;

    fn label(&self) -> String {
        format!("eval({})", self.fields().join(","))
    }
}

/// Predicate over a record.
pub trait BoolExpr: fmt::Debug + Send + Sync {
    fn fields(&self) -> Vec<String>;

    fn evaluate_bool(&self, row: &Record) -> Result<bool, EvalError>;

    fn label(&self) -> String {
        format!("eval({})", self.fields().join(","))
    }
}

/// Reads a field; absent and `Null` values are reported as `NullField`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldExpr {
    pub field: String,
}

impl FieldExpr {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl ValueExpr for FieldExpr {
    fn fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn evaluate(&self, row: &Record) -> Result<FieldValue, EvalError> {
        match row.get(&self.field) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(EvalError::NullField(self.field.clone())),
        }
    }

    fn label(&self) -> String {
        self.field.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstExpr {
    pub value: FieldValue,
}

impl ConstExpr {
    pub fn new(value: impl Into<FieldValue>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl ValueExpr for ConstExpr {
    fn fields(&self) -> Vec<String> {
        Vec::new()
    }

    fn evaluate(&self, _row: &Record) -> Result<FieldValue, EvalError> {
        Ok(self.value.clone())
    }

    fn label(&self) -> String {
        self.value.to_string_repr()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }

    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Neq),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Lte),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Gte),
            _ => None,
        }
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Neq => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Lte => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Gte => ord != Ordering::Less,
        }
    }
}

/// `field <op> literal`, numeric when both sides parse as numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareExpr {
    pub field: String,
    pub op: CompareOp,
    pub literal: FieldValue,
}

impl CompareExpr {
    pub fn new(field: impl Into<String>, op: CompareOp, literal: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            op,
            literal: literal.into(),
        }
    }
}

impl BoolExpr for CompareExpr {
    fn fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn evaluate_bool(&self, row: &Record) -> Result<bool, EvalError> {
        let value = match row.get(&self.field) {
            Some(v) if !v.is_null() => v,
            _ => return Err(EvalError::NullField(self.field.clone())),
        };
        if value.as_list().is_some() {
            return Err(EvalError::Type {
                field: self.field.clone(),
                value: value.to_string_repr(),
                expected: "a scalar",
            });
        }
        Ok(self.op.holds(value.compare(&self.literal)))
    }

    fn label(&self) -> String {
        format!(
            "{}{}{}",
            self.field,
            self.op.as_str(),
            self.literal.to_string_repr()
        )
    }
}
