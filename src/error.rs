//! Error taxonomy shared by the parser, the executor and the table store.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed statement text.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("expected {}, found {found}", .expected.join(" or "))]
pub struct SyntaxError {
    /// Every token (or token class) that would have been accepted.
    pub expected: Vec<String>,
    /// What was actually there.
    pub found: String,
}

impl SyntaxError {
    pub fn new(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            expected: vec![expected.into()],
            found: found.into(),
        }
    }

    pub fn one_of<I, S>(expected: I, found: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
            found: found.into(),
        }
    }
}

/// Unknown table or column, duplicate definitions and shape mismatches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("{0} already exists")]
    TableExists(String),

    #[error("Column {column} not found in table {table}")]
    ColumnNotFound { table: String, column: String },

    #[error("Column {0} is defined more than once")]
    DuplicateColumn(String),

    /// A table or column name that cannot be used as part of a file name.
    #[error("{0:?} is not a valid table or column name")]
    InvalidName(String),

    #[error("Row is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("{columns} columns given but {values} values supplied")]
    ValueCountMismatch { columns: usize, values: usize },

    #[error("No index on {table}.{column}")]
    IndexNotFound { table: String, column: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Error parsing query: {0}")]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A value that does not match its declared or required type.
    #[error("Type error: {0}")]
    Type(String),

    /// A positional row reference outside the table's row sequence.
    #[error("Row position {position} is out of range for {table} ({len} rows)")]
    Range {
        table: String,
        position: usize,
        len: usize,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("No where clause found")]
    MissingWhereClause,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_lists_expected_tokens() {
        let err = SyntaxError::one_of(["FROM", "','"], "WHERE");
        assert_eq!(err.to_string(), "expected FROM or ',', found WHERE");

        let err: Error = err.into();
        assert_eq!(
            err.to_string(),
            "Error parsing query: expected FROM or ',', found WHERE"
        );
    }

    #[test]
    fn test_schema_error_messages() {
        let err = SchemaError::MissingColumns(vec!["Id".into(), "Name".into()]);
        assert_eq!(err.to_string(), "Row is missing required columns: Id, Name");

        let err: Error = SchemaError::TableNotFound("T".into()).into();
        assert_eq!(err.to_string(), "Table T not found");
    }
}
