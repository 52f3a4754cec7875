use serde::{Deserialize, Serialize};

use crate::data_type::DataType;
use crate::value::Value;

/// Describes one column of a table schema.
/// Defined once by `CREATE TABLE` and never altered afterward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Column {
    /// The name of the column, unique within its table.
    pub name: String,
    /// The logical data type of the column.
    #[serde(rename = "Type")]
    pub data_type: DataType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    /// Whether `NULL` may be stored in this column.
    #[serde(default)]
    pub allow_null: bool,
}

impl Column {
    /// Creates a plain, non-nullable column without key constraints.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            primary_key: false,
            unique: false,
            allow_null: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }

    /// Returns true if `value` may be stored in this column as-is.
    pub fn accepts(&self, value: &Value) -> bool {
        match value.data_type() {
            None => self.allow_null,
            Some(data_type) => data_type == self.data_type,
        }
    }
}
