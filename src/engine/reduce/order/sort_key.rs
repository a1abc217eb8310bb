use std::cmp::Ordering;

use crate::engine::reduce::record_set::Record;
use crate::engine::types::FieldValue;

/// How a sort field's values are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortInterpretation {
    /// Numbers, and strings that parse as numbers, are numeric
    #[default]
    Auto,
    Numeric,
    /// Everything compares as text
    Str,
}

impl SortInterpretation {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "" | "auto" => Some(SortInterpretation::Auto),
            "num" => Some(SortInterpretation::Numeric),
            "str" => Some(SortInterpretation::Str),
            _ => None,
        }
    }
}

/// One field of a sort clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SortElement {
    pub field: String,
    pub ascending: bool,
    pub interpretation: SortInterpretation,
}

impl SortElement {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
            interpretation: SortInterpretation::Auto,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            ascending: false,
            ..Self::asc(field)
        }
    }

    pub fn with_interpretation(mut self, interpretation: SortInterpretation) -> Self {
        self.interpretation = interpretation;
        self
    }
}

/// Wrapper for f64 that implements Ord by treating NaN as equal to itself
/// and placing it after every real number.
#[derive(Debug, Clone, Copy)]
pub struct OrderedF64(pub f64);

impl PartialEq for OrderedF64 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedF64 {}

impl PartialOrd for OrderedF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.0.partial_cmp(&other.0) {
            Some(ord) => ord,
            None => {
                if self.0.is_nan() && other.0.is_nan() {
                    Ordering::Equal
                } else if self.0.is_nan() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
        }
    }
}

/// A field value parsed once for sorting.
///
/// Ranked numeric < string < other; "other" (absent) sorts last in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Numeric(OrderedF64),
    Str(String),
    Other,
}

impl SortKey {
    pub fn from_value(value: Option<&FieldValue>, interpretation: SortInterpretation) -> Self {
        let Some(value) = value else {
            return SortKey::Other;
        };
        match (value, interpretation) {
            (FieldValue::Null, _) => SortKey::Other,
            (FieldValue::Int64(_) | FieldValue::Float64(_), SortInterpretation::Str) => {
                SortKey::Str(value.to_string_repr())
            }
            (FieldValue::Int64(i), _) => SortKey::Numeric(OrderedF64(*i as f64)),
            (FieldValue::Float64(f), _) => SortKey::Numeric(OrderedF64(*f)),
            (FieldValue::Utf8(s), SortInterpretation::Str) => SortKey::Str(s.clone()),
            (FieldValue::Utf8(s), _) => match s.trim().parse::<f64>() {
                Ok(n) => SortKey::Numeric(OrderedF64(n)),
                Err(_) => SortKey::Str(s.clone()),
            },
            (FieldValue::Utf8List(_), _) => SortKey::Str(value.to_string_repr()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Numeric(_) => 0,
            SortKey::Str(_) => 1,
            SortKey::Other => 2,
        }
    }

    /// Three-way comparison in the requested direction.
    pub fn compare(&self, other: &SortKey, ascending: bool) -> Ordering {
        match (self, other) {
            (SortKey::Other, SortKey::Other) => return Ordering::Equal,
            (SortKey::Other, _) => return Ordering::Greater,
            (_, SortKey::Other) => return Ordering::Less,
            _ => {}
        }
        let ord = match (self, other) {
            (SortKey::Numeric(a), SortKey::Numeric(b)) => a.cmp(b),
            (SortKey::Str(a), SortKey::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        };
        if ascending { ord } else { ord.reverse() }
    }
}

/// Parses the sort keys of one row.
pub fn extract_keys(row: &Record, elements: &[SortElement]) -> Vec<SortKey> {
    elements
        .iter()
        .map(|e| SortKey::from_value(row.get(&e.field), e.interpretation))
        .collect()
}

/// Lexicographic comparison of key tuples; ties fall through to the next element.
pub fn compare_keys(a: &[SortKey], b: &[SortKey], elements: &[SortElement]) -> Ordering {
    for ((x, y), element) in a.iter().zip(b.iter()).zip(elements.iter()) {
        let ord = x.compare(y, element.ascending);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
