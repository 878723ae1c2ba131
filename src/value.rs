/// Column types and the dynamically typed `Value` stored in row slots.
///
/// Values carry total equality and hashing (floats compare bitwise, foreign-key
/// rows compare by identity) so that any value, including `Null`, can be used
/// as an index key.

use crate::error::{Error, Result};
use crate::row::Row;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Scalar column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int32,
    Int64,
    Float64,
    String,
    Guid,
    DateTime,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int32 | ColumnType::Int64 | ColumnType::Float64)
    }
}

/// A single cell value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Guid(Uuid),
    DateTime(NaiveDateTime),
    /// Value of a foreign-key column: the parent row.
    Row(Row),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Value::Guid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_row(&self) -> Option<&Row> {
        match self {
            Value::Row(row) => Some(row),
            _ => None,
        }
    }

    /// The scalar type of this value, `None` for nulls and rows.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null | Value::Row(_) => None,
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Int32(_) => Some(ColumnType::Int32),
            Value::Int64(_) => Some(ColumnType::Int64),
            Value::Float64(_) => Some(ColumnType::Float64),
            Value::String(_) => Some(ColumnType::String),
            Value::Guid(_) => Some(ColumnType::Guid),
            Value::DateTime(_) => Some(ColumnType::DateTime),
        }
    }

    /// Converts the value to `target`, allowing numeric conversions.
    ///
    /// Returns `None` if the value cannot be represented. Null stays null.
    pub fn coerce(self, target: ColumnType) -> Option<Value> {
        if self.is_null() || self.column_type() == Some(target) {
            return Some(self);
        }
        match (target, &self) {
            (ColumnType::Int32, Value::Int64(v)) => i32::try_from(*v).ok().map(Value::Int32),
            (ColumnType::Int32, Value::Float64(v)) => {
                let r = v.round();
                (r >= f64::from(i32::MIN) && r <= f64::from(i32::MAX)).then(|| Value::Int32(r as i32))
            }
            (ColumnType::Int64, Value::Int32(v)) => Some(Value::Int64(*v as i64)),
            // i64::MAX is not representable; 2^63 is the first value out of range
            (ColumnType::Int64, Value::Float64(v)) => {
                let r = v.round();
                (r >= -9_223_372_036_854_775_808.0 && r < 9_223_372_036_854_775_808.0).then(|| Value::Int64(r as i64))
            }
            (ColumnType::Float64, _) => self.as_f64().map(Value::Float64),
            _ => None,
        }
    }

    /// Orders two values. Numbers of different widths compare numerically;
    /// nulls, rows and mismatched types are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Row(a), Value::Row(b)) if a == b => Some(Ordering::Equal),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Text form used by the XML snapshot. `None` for nulls and rows.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null | Value::Row(_) => None,
            Value::Bool(v) => Some(v.to_string()),
            Value::Int32(v) => Some(v.to_string()),
            Value::Int64(v) => Some(v.to_string()),
            Value::Float64(v) => Some(v.to_string()),
            Value::String(v) => Some(v.clone()),
            Value::Guid(v) => Some(v.to_string()),
            Value::DateTime(v) => Some(v.format(DATETIME_FORMAT).to_string()),
        }
    }

    /// Parses the text form of a value of the given type.
    pub fn parse(column_type: ColumnType, text: &str) -> Result<Value> {
        let bad = |e: &dyn fmt::Display| {
            Error::validation(
                "",
                crate::error::ValidationKind::TypeMismatch,
                format!("cannot parse '{}' as {:?}: {}", text, column_type, e),
            )
        };
        let trimmed = text.trim();
        Ok(match column_type {
            ColumnType::Bool => Value::Bool(trimmed.parse().map_err(|e| bad(&e))?),
            ColumnType::Int32 => Value::Int32(trimmed.parse().map_err(|e| bad(&e))?),
            ColumnType::Int64 => Value::Int64(trimmed.parse().map_err(|e| bad(&e))?),
            ColumnType::Float64 => Value::Float64(trimmed.parse().map_err(|e| bad(&e))?),
            ColumnType::String => Value::String(text.to_string()),
            ColumnType::Guid => Value::Guid(Uuid::parse_str(trimmed).map_err(|e| bad(&e))?),
            ColumnType::DateTime => Value::DateTime(
                NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT).map_err(|e| bad(&e))?,
            ),
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Row(a), Value::Row(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::Guid(v) => v.hash(state),
            Value::DateTime(v) => v.hash(state),
            Value::Row(row) => row.id().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Row(row) => write!(f, "{:?}", row),
            other => write!(f, "{}", other.to_text().unwrap_or_default()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Row> for Value {
    fn from(v: Row) -> Self {
        Value::Row(v)
    }
}

impl From<&Row> for Value {
    fn from(v: &Row) -> Self {
        Value::Row(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(Value::Float64(f64::NAN), Value::Float64(f64::NAN));
        assert_ne!(Value::Float64(0.0), Value::Float64(-0.0));
        assert_ne!(Value::Int32(1), Value::Int64(1));
    }

    #[test]
    fn test_null_is_hashable_key() {
        let mut set = HashSet::new();
        set.insert(Value::Null);
        set.insert(Value::Int32(3));
        assert!(set.contains(&Value::Null));
        assert!(set.contains(&Value::Int32(3)));
        assert!(!set.contains(&Value::Int64(3)));
    }

    #[test]
    fn test_compare_mixed_numbers() {
        assert_eq!(Value::Int32(2).compare(&Value::Float64(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Int32(1)), None);
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(Value::Int64(7).coerce(ColumnType::Int32), Some(Value::Int32(7)));
        assert_eq!(Value::Int32(7).coerce(ColumnType::Float64), Some(Value::Float64(7.0)));
        assert_eq!(Value::from("x").coerce(ColumnType::Int32), None);
        assert_eq!(Value::Null.coerce(ColumnType::Guid), Some(Value::Null));
        assert_eq!(Value::Float64(2.6).coerce(ColumnType::Int32), Some(Value::Int32(3)));
        assert_eq!(Value::Float64(3e9).coerce(ColumnType::Int32), None);
        assert_eq!(Value::Float64(f64::NAN).coerce(ColumnType::Int32), None);
        assert_eq!(Value::Float64(-3e9).coerce(ColumnType::Int64), Some(Value::Int64(-3_000_000_000)));
        assert_eq!(Value::Float64(1e19).coerce(ColumnType::Int64), None);
    }

    #[test]
    fn test_text_forms() {
        let when = NaiveDateTime::parse_from_str("2024-03-01T10:30:00", DATETIME_FORMAT).unwrap();
        let id = Uuid::new_v4();
        for value in [
            Value::Bool(true),
            Value::Int32(-5),
            Value::Int64(1 << 40),
            Value::Float64(2.25),
            Value::from("hello"),
            Value::Guid(id),
            Value::DateTime(when),
        ] {
            let text = value.to_text().unwrap();
            let parsed = Value::parse(value.column_type().unwrap(), &text).unwrap();
            assert_eq!(parsed, value);
        }
        assert!(Value::parse(ColumnType::Int32, "abc").is_err());
    }
}
