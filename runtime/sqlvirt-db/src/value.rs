//! Native values carried by parameters and result cells.

use std::fmt;
use std::fmt::Write as _;

use rust_decimal::Decimal;

/// A single parameter or result cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i32),
    Long(i64),
    Decimal(Decimal),
    Real(f64),
    Boolean(bool),
    Blob(Vec<u8>),
}

/// Runtime type of a non-null [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Text,
    Integer,
    Long,
    Decimal,
    Real,
    Boolean,
    Blob,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `None` for `Null`.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Text(_) => Some(ValueKind::Text),
            Value::Integer(_) => Some(ValueKind::Integer),
            Value::Long(_) => Some(ValueKind::Long),
            Value::Decimal(_) => Some(ValueKind::Decimal),
            Value::Real(_) => Some(ValueKind::Real),
            Value::Boolean(_) => Some(ValueKind::Boolean),
            Value::Blob(_) => Some(ValueKind::Blob),
        }
    }

    /// Plain text form, as sent in parameter headers and untyped XML cells.
    /// `None` for `Null`.
    pub fn text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(text) => Some(text.clone()),
            Value::Integer(v) => Some(v.to_string()),
            Value::Long(v) => Some(v.to_string()),
            Value::Decimal(v) => Some(v.to_string()),
            Value::Real(v) => Some(v.to_string()),
            Value::Boolean(v) => Some(v.to_string()),
            Value::Blob(bytes) => {
                let mut hex = String::with_capacity(bytes.len() * 2);
                for byte in bytes {
                    let _ = write!(hex, "{byte:02x}");
                }
                Some(hex)
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Text => "text",
            ValueKind::Integer => "integer",
            ValueKind::Long => "long",
            ValueKind::Decimal => "decimal",
            ValueKind::Real => "real",
            ValueKind::Boolean => "boolean",
            ValueKind::Blob => "blob",
        };
        f.write_str(name)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
