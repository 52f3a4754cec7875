use std::fmt;

use serde::{Deserialize, Serialize};

/// Represents the supported data types in the database schema.
/// These types define the structure of columns and the expected format of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// A 64-bit signed integer.
    Int,
    /// A 64-bit floating-point number.
    Float,
    /// A boolean value (true or false).
    Bool,
    /// A variable-length UTF-8 character string.
    String,
    /// A timestamp without time zone, written `YYYY-MM-DD HH:MM:SS`.
    DateTime,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "INT",
            Self::Float => "FLOAT",
            Self::Bool => "BOOL",
            Self::String => "STRING",
            Self::DateTime => "DATETIME",
        };
        f.write_str(name)
    }
}
