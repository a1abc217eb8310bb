use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value as JsonValue};

/// Kind tag of a [`FieldValue`]; decides which accessor is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Absent,
    Numeric,
    String,
    StringList,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Absent => "Absent",
            ValueKind::Numeric => "Numeric",
            ValueKind::String => "String",
            ValueKind::StringList => "StringList",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged value carried by every record field and every statistic cell.
///
/// Integers and floats are both `Numeric`; they are kept apart only so that
/// counts and integral sums print without a fractional part.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Utf8List(Vec<String>),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Null => ValueKind::Absent,
            FieldValue::Int64(_) | FieldValue::Float64(_) => ValueKind::Numeric,
            FieldValue::Utf8(_) => ValueKind::String,
            FieldValue::Utf8List(_) => ValueKind::StringList,
        }
    }

    /// Builds a numeric value, collapsing integral floats to `Int64`.
    pub fn number(v: f64) -> Self {
        if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
            FieldValue::Int64(v as i64)
        } else {
            FieldValue::Float64(v)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// True only for values that are numeric by type, not by parsing.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldValue::Int64(_) | FieldValue::Float64(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::Utf8List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int64(i) => Some(*i),
            FieldValue::Float64(f) if f.fract() == 0.0 => Some(*f as i64),
            FieldValue::Utf8(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Int64(i) if *i >= 0 => Some(*i as u64),
            FieldValue::Float64(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u64),
            FieldValue::Utf8(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
    }

    /// Numeric view of the value. Strings are parsed; lists and nulls are not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float64(f) => Some(*f),
            FieldValue::Int64(i) => Some(*i as f64),
            FieldValue::Utf8(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// String form used for distinct counting, canonical keys and list output.
    pub fn to_string_repr(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Int64(i) => i.to_string(),
            FieldValue::Float64(f) => f.to_string(),
            FieldValue::Utf8(s) => s.clone(),
            FieldValue::Utf8List(v) => v.join(" "),
        }
    }

    /// Numeric comparison when both sides parse as numbers, lexical otherwise.
    pub fn compare(&self, other: &Self) -> Ordering {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
        self.to_string_repr().cmp(&other.to_string_repr())
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Null => JsonValue::Null,
            FieldValue::Int64(i) => JsonValue::Number(Number::from(*i)),
            FieldValue::Float64(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            FieldValue::Utf8(s) => JsonValue::String(s.clone()),
            FieldValue::Utf8List(v) => {
                JsonValue::Array(v.iter().cloned().map(JsonValue::String).collect())
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_repr())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int64(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int64(value as i64)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        if value <= i64::MAX as u64 {
            FieldValue::Int64(value as i64)
        } else {
            FieldValue::Utf8(value.to_string())
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float64(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Utf8(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Utf8(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::Utf8List(value)
    }
}

impl From<JsonValue> for FieldValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::Bool(b) => FieldValue::Utf8(b.to_string()),
            JsonValue::Number(num) => {
                if let Some(i) = num.as_i64() {
                    FieldValue::Int64(i)
                } else if let Some(u) = num.as_u64() {
                    FieldValue::from(u)
                } else if let Some(f) = num.as_f64() {
                    FieldValue::Float64(f)
                } else {
                    FieldValue::Utf8(num.to_string())
                }
            }
            JsonValue::String(s) => FieldValue::Utf8(s),
            JsonValue::Array(items) => FieldValue::Utf8List(
                items
                    .into_iter()
                    .map(|item| match item {
                        JsonValue::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            JsonValue::Object(_) => FieldValue::Utf8(value.to_string()),
        }
    }
}

impl From<&FieldValue> for JsonValue {
    fn from(value: &FieldValue) -> Self {
        value.to_json()
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Int64(i) => serializer.serialize_i64(*i),
            FieldValue::Float64(f) => serializer.serialize_f64(*f),
            FieldValue::Utf8(s) => serializer.serialize_str(s),
            FieldValue::Utf8List(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = JsonValue::deserialize(deserializer)?;
        Ok(FieldValue::from(json))
    }
}
