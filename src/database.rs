use std::collections::HashSet;
use std::fmt;

use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::{
    ast::{
        ColumnsSelect, CreateTable, Delete, DropTable, Expr, InsertInto, Select, SelectItem,
        Statement, Update,
    },
    codec::{Record, encode_value},
    column::Column,
    config::StorageConfig,
    data_type::DataType,
    error::{Error, Result, SchemaError},
    eval,
    parser::parse,
    storage::{Predicate, Storage},
    table::{Row, TableSchema},
    value::{DATETIME_FORMAT, Value},
};

/// Result objects carrying this key are never returned by `SELECT`.
pub const RESERVED_KEY: &str = "TableName";

/// What a successfully executed statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The projected rows of a `SELECT`.
    Rows(Vec<Record>),
    /// A short status line for every other statement.
    Status(String),
}

impl Outcome {
    fn status(message: impl Into<String>) -> Self {
        Outcome::Status(message.into())
    }

    /// Render as the text handed back to a client: compact JSON for rows.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Rows(rows) => {
                let array = Json::Array(rows.iter().cloned().map(Json::Object).collect());
                write!(f, "{array}")
            }
            Outcome::Status(message) => f.write_str(message),
        }
    }
}

/// The statement executor: validates every statement against the stored
/// schemas and runs it on a [Storage].
#[derive(Debug)]
pub struct Database {
    storage: Storage,
}

impl Database {
    /// Wraps an already opened store.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Opens a database over the storage root described by `config`.
    pub fn open(config: StorageConfig) -> Result<Self> {
        Storage::open(config).map(Self::new)
    }

    /// The underlying table store.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Direct access to the store, bypassing the SQL layer.
    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Runs one statement and renders its result. Never fails: any error is
    /// logged and returned as its message.
    ///
    /// # Example
    /// ```
    /// use jsondb::{Database, StorageConfig};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let mut db = Database::open(StorageConfig::new(dir.path())).unwrap();
    ///
    /// assert_eq!(db.execute_query("CREATE TABLE T (Id INT PRIMARY KEY, Name STRING)"), "Table T created");
    /// db.execute_query("INSERT INTO T VALUES (1, 'A')");
    /// assert_eq!(db.execute_query("SELECT Name FROM T WHERE Id = 1"), r#"[{"Name":"A"}]"#);
    /// assert_eq!(db.execute_query("DELETE FROM T"), "No where clause found");
    /// ```
    pub fn execute_query(&mut self, sql: &str) -> String {
        match self.execute(sql) {
            Ok(outcome) => outcome.render(),
            Err(err) => {
                warn!(error = %err, sql, "statement failed");
                err.to_string()
            }
        }
    }

    /// Parses and executes one statement.
    pub fn execute(&mut self, sql: &str) -> Result<Outcome> {
        let statement = parse(sql)?;
        self.execute_statement(statement)
    }

    pub fn execute_statement(&mut self, statement: Statement) -> Result<Outcome> {
        debug!(kind = statement.kind(), "executing statement");
        match statement {
            Statement::Select(select) => self.select(select),
            Statement::InsertInto(insert) => self.insert(insert),
            Statement::CreateTable(create) => self.create_table(create),
            Statement::Update(update) => self.update(update),
            Statement::Delete(delete) => self.delete(delete),
            Statement::DropTable(drop) => self.drop_table(drop),
        }
    }

    /// Executes a `SELECT`.
    ///
    /// Table, projected columns and WHERE columns are all validated before any
    /// row is read. Rows are filtered, projected (renamed where aliased),
    /// deduplicated under `DISTINCT`, and any object carrying [RESERVED_KEY]
    /// is dropped.
    fn select(&mut self, select: Select) -> Result<Outcome> {
        let schema = self.storage.table_definition(&select.table)?;

        let items = match select.columns {
            ColumnsSelect::Star => schema
                .names()
                .map(|name| SelectItem {
                    column: name.to_string(),
                    alias: None,
                })
                .collect(),
            ColumnsSelect::Columns(items) => items,
        };
        for item in &items {
            ensure_column(&select.table, &schema, &item.column)?;
        }
        ensure_expr_columns(&select.table, &schema, select.where_clause.as_ref())?;

        let predicate = where_predicate(select.where_clause.as_ref());
        let rows = self.storage.query(&select.table, &predicate)?;

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for row in rows {
            let record = project(&row, &items)?;
            if record.contains_key(RESERVED_KEY) {
                continue;
            }
            if select.distinct && !seen.insert(Json::Object(record.clone()).to_string()) {
                continue;
            }
            records.push(record);
        }

        Ok(Outcome::Rows(records))
    }

    /// Executes an `INSERT`. Without a column list the values follow the
    /// schema order.
    fn insert(&mut self, insert: InsertInto) -> Result<Outcome> {
        let schema = self.storage.table_definition(&insert.table)?;

        let columns: Vec<String> = match insert.columns {
            Some(columns) => columns,
            None => schema.names().map(str::to_string).collect(),
        };
        if columns.len() != insert.values.len() {
            return Err(SchemaError::ValueCountMismatch {
                columns: columns.len(),
                values: insert.values.len(),
            }
            .into());
        }

        let mut row = Row::new();
        for (name, value) in columns.into_iter().zip(insert.values) {
            let column = ensure_column(&insert.table, &schema, &name)?;
            if row.contains(&name) {
                return Err(SchemaError::DuplicateColumn(name).into());
            }
            let value = coerce(column, value)?;
            row.set(name, value);
        }

        self.storage.insert(&insert.table, &row)?;
        Ok(Outcome::status(format!("Row inserted into {}", insert.table)))
    }

    /// Executes a `CREATE TABLE` and indexes every `INT PRIMARY KEY` column.
    fn create_table(&mut self, create: CreateTable) -> Result<Outcome> {
        let columns = create
            .columns
            .into_iter()
            .map(|def| {
                let allow_null = def.allows_null();
                let mut column = Column::new(def.name, def.data_type);
                column.primary_key = def.primary_key;
                column.unique = def.unique;
                column.allow_null = allow_null;
                column
            })
            .collect();
        let schema = TableSchema::new(columns)?;

        self.storage.create_table(&create.name, &schema)?;
        for column in schema.columns() {
            if column.primary_key && column.data_type == DataType::Int {
                self.storage.create_index(&create.name, &column.name)?;
            }
        }

        Ok(Outcome::status(format!("Table {} created", create.name)))
    }

    /// Executes an `UPDATE`: every matching row gets the SET values merged
    /// into a copy of itself, which is written back at the same position.
    fn update(&mut self, update: Update) -> Result<Outcome> {
        let Update {
            table,
            assignments,
            where_clause,
        } = update;
        let schema = self.storage.table_definition(&table)?;

        let mut changes = Vec::with_capacity(assignments.len());
        for (name, value) in assignments {
            let column = ensure_column(&table, &schema, &name)?;
            changes.push((name, coerce(column, value)?));
        }

        let Some(where_clause) = where_clause else {
            return Err(Error::MissingWhereClause);
        };
        ensure_expr_columns(&table, &schema, Some(&where_clause))?;

        let matches = self
            .storage
            .scan(&table, &where_predicate(Some(&where_clause)))?;
        if matches.is_empty() {
            return Ok(Outcome::status(format!("No rows to update in {table}")));
        }

        for (position, mut row) in matches {
            for (name, value) in &changes {
                row.set(name.clone(), value.clone());
            }
            self.storage.update(&table, position, &row)?;
        }
        Ok(Outcome::status(format!("Rows updated in {table}")))
    }

    /// Executes a `DELETE`. A missing WHERE clause is an error, not a request
    /// to empty the table.
    fn delete(&mut self, delete: Delete) -> Result<Outcome> {
        let schema = self.storage.table_definition(&delete.table)?;
        let Some(where_clause) = &delete.where_clause else {
            return Err(Error::MissingWhereClause);
        };
        ensure_expr_columns(&delete.table, &schema, Some(where_clause))?;

        let matches = self
            .storage
            .scan(&delete.table, &where_predicate(Some(where_clause)))?;

        // highest position first, so earlier positions stay valid
        for (position, _) in matches.into_iter().rev() {
            self.storage.delete(&delete.table, position)?;
        }
        Ok(Outcome::status(format!("Rows deleted from {}", delete.table)))
    }

    fn drop_table(&mut self, drop: DropTable) -> Result<Outcome> {
        self.storage.drop_table(&drop.name)?;
        Ok(Outcome::status(format!("Table {} dropped", drop.name)))
    }
}

fn ensure_column<'a>(table: &str, schema: &'a TableSchema, name: &str) -> Result<&'a Column> {
    schema.column(name).ok_or_else(|| {
        SchemaError::ColumnNotFound {
            table: table.to_string(),
            column: name.to_string(),
        }
        .into()
    })
}

fn ensure_expr_columns(table: &str, schema: &TableSchema, expr: Option<&Expr>) -> Result<()> {
    for name in expr.map(Expr::columns).unwrap_or_default() {
        ensure_column(table, schema, name)?;
    }
    Ok(())
}

/// Builds the row filter for an optional WHERE clause, hinted when the
/// clause has the `column <op> <integer>` shape.
fn where_predicate(where_clause: Option<&Expr>) -> Predicate<'_> {
    let Some(expr) = where_clause else {
        return Predicate::all();
    };
    let predicate = Predicate::new(move |row| eval::evaluate(expr, row));
    match eval::index_hint(expr) {
        Some(hint) => predicate.with_hint(hint),
        None => predicate,
    }
}

fn project(row: &Row, items: &[SelectItem]) -> Result<Record> {
    items
        .iter()
        .map(|item| {
            let value = row.get(&item.column).unwrap_or(&Value::Null);
            Ok((item.output_name().to_string(), encode_value(value)?))
        })
        .collect()
}

/// Adapts a literal to the column it is stored in: INT widens to FLOAT,
/// DATETIME keeps its text in a STRING column, and text must be a valid
/// timestamp to land in a DATETIME column. Other mismatches are left for the
/// codec to reject.
fn coerce(column: &Column, value: Value) -> Result<Value> {
    Ok(match (column.data_type, value) {
        (DataType::Float, Value::Int(i)) => Value::Float(i as f64),
        (DataType::String, Value::DateTime(dt)) => {
            Value::Text(dt.format(DATETIME_FORMAT).to_string().into())
        }
        (DataType::DateTime, Value::Text(text)) => match Value::parse_datetime(&text) {
            Some(dt) => Value::DateTime(dt),
            None => {
                return Err(Error::type_error(format!(
                    "Value '{text}' is not of type {}.",
                    DataType::DateTime
                )));
            }
        },
        (_, value) => value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        Database::open(StorageConfig::new(dir.path())).unwrap()
    }

    /// `T(Id INT PRIMARY KEY UNIQUE, Name STRING)` holding (1,'A'), (2,'B'), (3,'C').
    fn scenario(dir: &TempDir) -> Database {
        let mut db = open(dir);
        db.execute("CREATE TABLE T (Id INT PRIMARY KEY UNIQUE, Name STRING)")
            .unwrap();
        for (id, name) in [(1, "A"), (2, "B"), (3, "C")] {
            db.execute(&format!("INSERT INTO T VALUES ({id}, '{name}')"))
                .unwrap();
        }
        db
    }

    fn leaf_keys(db: &mut Database) -> Vec<i64> {
        db.storage_mut()
            .get_index("T", "Id")
            .unwrap()
            .get_all_leaf_keys()
    }

    #[test]
    fn test_create_table_status_and_schema() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);

        assert_eq!(
            db.execute_query("CREATE TABLE T (Id INT PRIMARY KEY UNIQUE, Name STRING NULL, At DATETIME NOT NULL)"),
            "Table T created"
        );

        let schema = db.storage().table_definition("T").unwrap();
        let id = schema.column("Id").unwrap();
        assert!(id.primary_key && id.unique && !id.allow_null);
        assert!(schema.column("Name").unwrap().allow_null);
        assert!(!schema.column("At").unwrap().allow_null);
        assert!(db.storage().has_index("T", "Id"));

        assert_eq!(
            db.execute_query("CREATE TABLE T (Id INT)"),
            "T already exists"
        );
        assert!(matches!(
            db.execute("CREATE TABLE U (a INT, a STRING)"),
            Err(Error::Schema(SchemaError::DuplicateColumn(_)))
        ));
    }

    #[test]
    fn test_select_where_greater_than() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        assert_eq!(
            db.execute_query("SELECT * FROM T WHERE Id > 1"),
            r#"[{"Id":2,"Name":"B"},{"Id":3,"Name":"C"}]"#
        );
    }

    #[test]
    fn test_delete_updates_rows_and_index() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        assert_eq!(
            db.execute_query("DELETE FROM T WHERE Id = 2"),
            "Rows deleted from T"
        );
        assert_eq!(
            db.execute_query("SELECT * FROM T"),
            r#"[{"Id":1,"Name":"A"},{"Id":3,"Name":"C"}]"#
        );
        assert_eq!(leaf_keys(&mut db), vec![1, 3]);
    }

    #[test]
    fn test_update_then_select_column() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        assert_eq!(
            db.execute_query("UPDATE T SET Name = 'Z' WHERE Id = 1"),
            "Rows updated in T"
        );
        assert_eq!(
            db.execute_query("SELECT Name FROM T WHERE Id = 1"),
            r#"[{"Name":"Z"}]"#
        );
        assert_eq!(
            db.execute_query("UPDATE T SET Name = 'Q' WHERE Id = 9"),
            "No rows to update in T"
        );
    }

    #[test]
    fn test_update_moves_index_keys() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        db.execute("UPDATE T SET Id = 10 WHERE Id >= 2").unwrap();
        assert_eq!(leaf_keys(&mut db), vec![1, 10, 10]);
        assert_eq!(
            db.execute_query("SELECT Name FROM T WHERE Id = 10"),
            r#"[{"Name":"B"},{"Name":"C"}]"#
        );
    }

    #[test]
    fn test_missing_where_clause() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        assert_eq!(db.execute_query("DELETE FROM T"), "No where clause found");
        assert_eq!(
            db.execute_query("UPDATE T SET Name = 'Z'"),
            "No where clause found"
        );
        assert_eq!(db.storage().row_count("T").unwrap(), 3);
    }

    #[test]
    fn test_unknown_table_and_columns() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        assert_eq!(db.execute_query("SELECT * FROM Nope"), "Table Nope not found");
        assert_eq!(
            db.execute_query("SELECT Age FROM T"),
            "Column Age not found in table T"
        );
        assert_eq!(
            db.execute_query("SELECT * FROM T WHERE Age > 1"),
            "Column Age not found in table T"
        );
        assert_eq!(
            db.execute_query("UPDATE T SET Age = 1 WHERE Id = 1"),
            "Column Age not found in table T"
        );
        assert_eq!(
            db.execute_query("INSERT INTO T (Id, Age) VALUES (4, 1)"),
            "Column Age not found in table T"
        );
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);

        assert_eq!(
            db.execute_query("SELECT * WHERE Id = 1"),
            "Error parsing query: expected FROM, found WHERE"
        );
    }

    #[test]
    fn test_rejected_insert_keeps_row_count() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        assert!(matches!(
            db.execute("INSERT INTO T (Id) VALUES (4)"),
            Err(Error::Schema(SchemaError::MissingColumns(_)))
        ));
        assert!(matches!(
            db.execute("INSERT INTO T VALUES ('four', 'D')"),
            Err(Error::Type(_))
        ));
        assert!(matches!(
            db.execute("INSERT INTO T VALUES (4)"),
            Err(Error::Schema(SchemaError::ValueCountMismatch { columns: 2, values: 1 }))
        ));
        assert!(matches!(
            db.execute("INSERT INTO T VALUES (NULL, 'D')"),
            Err(Error::Type(_))
        ));

        assert_eq!(db.storage().row_count("T").unwrap(), 3);
        assert_eq!(leaf_keys(&mut db), vec![1, 2, 3]);
    }

    #[test]
    fn test_insert_with_column_list_and_coercion() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.execute("CREATE TABLE M (Id INT, Score FLOAT, Note STRING, At DATETIME)")
            .unwrap();

        db.execute("INSERT INTO M (At, Note, Score, Id) VALUES ('2024-05-06 07:08:09', '2020-01-01 00:00:00', 3, 1)")
            .unwrap();
        assert_eq!(
            db.execute_query("SELECT * FROM M"),
            r#"[{"Id":1,"Score":3.0,"Note":"2020-01-01 00:00:00","At":"2024-05-06 07:08:09"}]"#
        );

        assert!(matches!(
            db.execute("INSERT INTO M VALUES (2, 1.0, 'x', 'yesterday')"),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn test_insert_rejects_repeated_column() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        assert!(matches!(
            db.execute("INSERT INTO T (Id, Name, Id) VALUES (4, 'D', 5)"),
            Err(Error::Schema(SchemaError::DuplicateColumn(name))) if name == "Id"
        ));
        assert_eq!(db.storage().row_count("T").unwrap(), 3);
        assert_eq!(leaf_keys(&mut db), vec![1, 2, 3]);
    }

    #[test]
    fn test_corrupt_index_degree_is_reported() {
        let dir = TempDir::new().unwrap();
        drop(scenario(&dir));
        std::fs::write(
            dir.path().join("T.Id.idx.json"),
            r#"{"Degree":18446744073709551615,"Root":{"Keys":[],"Children":[],"IsLeaf":true}}"#,
        )
        .unwrap();

        let mut db = open(&dir);
        let message = db.execute_query("INSERT INTO T VALUES (4, 'D')");
        assert!(message.contains("T.Id.idx.json"), "{message}");
        assert_eq!(db.storage().row_count("T").unwrap(), 3);
    }

    #[test]
    fn test_select_aliases_and_distinct() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);
        db.execute("INSERT INTO T VALUES (4, 'A')").unwrap();

        assert_eq!(
            db.execute_query("SELECT DISTINCT Name AS Who FROM T WHERE Id <> 2"),
            r#"[{"Who":"A"},{"Who":"C"}]"#
        );
        assert_eq!(
            db.execute_query("SELECT Name, Id FROM T WHERE Id <= 1"),
            r#"[{"Name":"A","Id":1}]"#
        );
    }

    #[test]
    fn test_reserved_key_rows_are_hidden() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.execute("CREATE TABLE R (TableName STRING, Id INT)").unwrap();
        db.execute("INSERT INTO R VALUES ('x', 1)").unwrap();

        assert_eq!(db.execute_query("SELECT * FROM R"), "[]");
        assert_eq!(db.execute_query("SELECT Id FROM R"), r#"[{"Id":1}]"#);
    }

    #[test]
    fn test_comparison_type_error() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        assert!(matches!(
            db.execute("SELECT * FROM T WHERE Name > 1"),
            Err(Error::Type(_))
        ));
        assert_eq!(
            db.execute_query("SELECT Id FROM T WHERE NOT (Id < 3)"),
            r#"[{"Id":3}]"#
        );
    }

    #[test]
    fn test_drop_table_removes_index_files() {
        let dir = TempDir::new().unwrap();
        let mut db = scenario(&dir);

        assert_eq!(db.execute_query("DROP TABLE T"), "Table T dropped");
        assert!(!dir.path().join("T.json").exists());
        assert!(!dir.path().join("T.Id.idx.json").exists());
        assert_eq!(db.execute_query("DROP TABLE T"), "Table T not found");
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        scenario(&dir);

        let mut db = open(&dir);
        db.execute("DELETE FROM T WHERE Id < 3").unwrap();
        assert_eq!(db.execute_query("SELECT * FROM T"), r#"[{"Id":3,"Name":"C"}]"#);
        assert_eq!(leaf_keys(&mut db), vec![3]);
    }
}
