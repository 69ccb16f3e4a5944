//! Opaque comparable values used as member ids and attribute values.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A scalar, boolean or interval value read from the analytical source.
///
/// Serialized untagged so fixtures read naturally: `null`, `true`, `42`,
/// `1.5`, `"Paris"`, `{"min": 0, "max": 10}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Range { min: Box<Value>, max: Box<Value> },
}

impl Value {
    pub fn text<S: Into<String>>(s: S) -> Self {
        Value::Text(s.into())
    }

    pub fn range(min: Value, max: Value) -> Self {
        Value::Range {
            min: Box::new(min),
            max: Box::new(max),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Bounds of a range value; a scalar is its own degenerate range.
    pub fn bounds(&self) -> (&Value, &Value) {
        match self {
            Value::Range { min, max } => (min, max),
            other => (other, other),
        }
    }

    /// Smallest range covering both values. Nulls are ignored.
    pub fn span(&self, other: &Value) -> Value {
        if self.is_null() {
            return other.clone();
        }
        if other.is_null() {
            return self.clone();
        }
        let (a_min, a_max) = self.bounds();
        let (b_min, b_max) = other.bounds();
        let min = if b_min < a_min { b_min } else { a_min };
        let max = if b_max > a_max { b_max } else { a_max };
        Value::range(min.clone(), max.clone())
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Range { .. } => 4,
        }
    }

    /// Ordering between values of the same kind; numbers compare across
    /// `Int`/`Float`. Returns `None` for values of unrelated kinds.
    pub fn natural_cmp(&self, other: &Value) -> Option<Ordering> {
        if self.rank() != other.rank() {
            return None;
        }
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            // Equal magnitudes still differ by kind, ints first.
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (
                Value::Range {
                    min: a_min,
                    max: a_max,
                },
                Value::Range {
                    min: b_min,
                    max: b_max,
                },
            ) => a_min.cmp(b_min).then_with(|| a_max.cmp(b_max)),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Text(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Range { min, max } => {
                5u8.hash(state);
                min.hash(state);
                max.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(true) => write!(f, "TRUE"),
            Value::Bool(false) => write!(f, "FALSE"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Range { min, max } => write!(f, "[{min}, {max}]"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_forms() {
        let values: Vec<Value> =
            serde_json::from_str(r#"[null, true, 42, 1.5, "Paris", {"min": 1, "max": 9}]"#)
                .unwrap();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Bool(true));
        assert_eq!(values[2], Value::Int(42));
        assert_eq!(values[3], Value::Float(1.5));
        assert_eq!(values[4], Value::text("Paris"));
        assert_eq!(values[5], Value::range(Value::Int(1), Value::Int(9)));
    }

    #[test]
    fn test_numeric_ordering_across_kinds() {
        assert!(Value::Int(2) < Value::Float(2.5));
        assert!(Value::Float(1.5) < Value::Int(2));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(
            Value::Int(1).natural_cmp(&Value::Float(3.0)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Int(1).natural_cmp(&Value::text("a")), None);
    }

    #[test]
    fn test_span_merges_ranges() {
        let inner = Value::range(Value::Int(10), Value::Int(20));
        let outer = Value::range(Value::Int(5), Value::Int(15));
        assert_eq!(inner.span(&outer), Value::range(Value::Int(5), Value::Int(20)));
        assert_eq!(Value::Null.span(&inner), inner);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Bool(true).to_string(), "TRUE");
        assert_eq!(Value::range(Value::Int(1), Value::Int(2)).to_string(), "[1, 2]");
    }
}
