use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::data_type::DataType;

/// Text layout of DATETIME literals and of DATETIME values on disk.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Represents a single data value stored in the database.
///
/// This enum wraps all supported Rust types into a single type that can be
/// passed around the engine. It includes support for SQL `NULL` values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// represents an empty or missing value.
    Null,
    /// A 64-bit signed integer value.
    Int(i64),
    /// A 64-bit floating-point value.
    Float(f64),
    /// A UTF-8 string value, wrapped in an [Arc] for cheap cloning.
    Text(Arc<str>),
    /// A boolean value.
    Bool(bool),
    /// A timestamp with second precision.
    DateTime(NaiveDateTime),
}

impl Value {
    /// Returns `true` if the value is [Value::Null].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the inner integer value if this is a [Value::Int].
    /// Otherwise, returns `None`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the inner float value if this is a [Value::Float].
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns a reference to the inner string slice if this is a [Value::Text].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the inner boolean value if this is a [Value::Bool].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the logical [DataType] corresponding to this value.
    ///
    /// Returns `None` if the value is [Value::Null]: a standalone NULL is
    /// untyped until it is checked against a column.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Int(_) => Some(DataType::Int),
            Self::Float(_) => Some(DataType::Float),
            Self::Text(_) => Some(DataType::String),
            Self::Bool(_) => Some(DataType::Bool),
            Self::DateTime(_) => Some(DataType::DateTime),
        }
    }

    /// Parses the `YYYY-MM-DD HH:MM:SS` layout, accepting only the canonical
    /// zero-padded spelling so that formatting gives back the same text.
    pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
        let dt = NaiveDateTime::parse_from_str(text, DATETIME_FORMAT).ok()?;
        (dt.format(DATETIME_FORMAT).to_string() == text).then_some(dt)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Self::DateTime(dt) => write!(f, "'{}'", dt.format(DATETIME_FORMAT)),
        }
    }
}
