use serde::{Deserialize, Serialize};

use crate::codec::Record;
use crate::column::Column;
use crate::error::SchemaError;
use crate::value::Value;

/// Ordered column definitions of one table. Column names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    /// Builds a schema, rejecting duplicate column names.
    pub fn new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A typed row: column name to value, in insertion order.
///
/// A row built by a caller may be partial; the codec rejects rows that miss
/// a schema column before anything is written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [Row::set].
    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Replaces the value of `column`, or appends it if the row does not have it yet.
    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Keeps only `columns`, in the order given. Unknown names are skipped.
    pub fn project(&self, columns: &[String]) -> Row {
        columns
            .iter()
            .filter_map(|name| self.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.set(name, value);
        }
        row
    }
}

/// The persisted document of one table: `{TableName, Columns, Data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableFile {
    pub table_name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub data: Vec<Record>,
}

impl TableFile {
    pub fn new(name: impl Into<String>, schema: &TableSchema) -> Self {
        Self {
            table_name: name.into(),
            columns: schema.columns().to_vec(),
            data: Vec::new(),
        }
    }

    pub fn schema(&self) -> Result<TableSchema, SchemaError> {
        TableSchema::new(self.columns.clone())
    }
}
