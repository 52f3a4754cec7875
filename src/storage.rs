//! File-backed table store.
//!
//! Every table lives in `<root>/<table>.json` and every index in
//! `<root>/<table>.<column>.idx.json`. Each operation reads and rewrites whole
//! files. Indexes are loaded lazily and cached for the lifetime of the
//! [Storage] instance; every row mutation updates the indexes of the table in
//! the same call, after the table file has been written.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use bitvec::prelude::*;
use tracing::{debug, info};

use crate::btree::BTree;
use crate::codec::{decode_row, encode_row};
use crate::config::StorageConfig;
use crate::data_type::DataType;
use crate::error::{Error, Result, SchemaError};
use crate::table::{Row, TableFile, TableSchema};
use crate::value::Value;

/// File name suffix of index side files.
pub const INDEX_SUFFIX: &str = ".idx.json";

/// Column consulted by [Storage::read].
pub const ID_COLUMN: &str = "Id";

/// Integer comparisons an index can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn holds(self, left: i64, right: i64) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
        }
    }

    /// Inclusive key interval of every `k` with `k <op> value`, or `None`
    /// when no key can satisfy it.
    pub fn key_range(self, value: i64) -> Option<(i64, i64)> {
        match self {
            Self::Eq => Some((value, value)),
            Self::Lt => value.checked_sub(1).map(|high| (i64::MIN, high)),
            Self::Le => Some((i64::MIN, value)),
            Self::Gt => value.checked_add(1).map(|low| (low, i64::MAX)),
            Self::Ge => Some((value, i64::MAX)),
        }
    }
}

/// States that a predicate only accepts rows where `column <comparison> value`
/// holds on the integer stored in `column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHint {
    pub column: String,
    pub comparison: Comparison,
    pub value: i64,
}

impl IndexHint {
    pub fn new(column: impl Into<String>, comparison: Comparison, value: i64) -> Self {
        Self {
            column: column.into(),
            comparison,
            value,
        }
    }
}

/// A row filter plus an optional description the store can plan with.
pub struct Predicate<'a> {
    filter: Box<dyn Fn(&Row) -> Result<bool> + 'a>,
    hint: Option<IndexHint>,
}

impl<'a> Predicate<'a> {
    pub fn new(filter: impl Fn(&Row) -> Result<bool> + 'a) -> Self {
        Self {
            filter: Box::new(filter),
            hint: None,
        }
    }

    /// Accepts every row.
    pub fn all() -> Self {
        Self::new(|_| Ok(true))
    }

    /// `column <comparison> value` over integer values, hinted.
    pub fn compare(column: impl Into<String>, comparison: Comparison, value: i64) -> Self {
        let hint = IndexHint::new(column, comparison, value);
        let column = hint.column.clone();
        Self::new(move |row| {
            Ok(row
                .get(&column)
                .and_then(Value::as_int)
                .is_some_and(|key| comparison.holds(key, value)))
        })
        .with_hint(hint)
    }

    /// Attaches a hint. The filter must reject every row the hint excludes.
    pub fn with_hint(mut self, hint: IndexHint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn hint(&self) -> Option<&IndexHint> {
        self.hint.as_ref()
    }

    /// Runs the filter on `row`.
    pub fn matches(&self, row: &Row) -> Result<bool> {
        (self.filter)(row)
    }
}

impl fmt::Debug for Predicate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("hint", &self.hint)
            .finish_non_exhaustive()
    }
}

/// How a scan selects candidate rows before the predicate runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPlan {
    Full,
    Index { column: String, low: i64, high: i64 },
}

/// Owns every table and index under one storage root.
#[derive(Debug)]
pub struct Storage {
    config: StorageConfig,
    indexes: HashMap<(String, String), BTree>,
}

impl Storage {
    /// Opens the store, creating the root directory if needed.
    ///
    /// # Example
    /// ```
    /// # use jsondb::{Column, DataType, Row, Storage, StorageConfig, TableSchema, Value};
    /// let dir = tempfile::tempdir().unwrap();
    /// let mut storage = Storage::open(StorageConfig::new(dir.path())).unwrap();
    ///
    /// let schema = TableSchema::new(vec![Column::new("Id", DataType::Int)]).unwrap();
    /// storage.create_table("T", &schema).unwrap();
    /// storage.insert("T", &Row::new().with("Id", Value::Int(7))).unwrap();
    ///
    /// assert_eq!(storage.read_all("T").unwrap().len(), 1);
    /// ```
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root).map_err(|e| Error::io(&config.root, e))?;
        debug!(root = %config.root.display(), "storage opened");

        Ok(Self {
            config,
            indexes: HashMap::new(),
        })
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.config.root.join(format!("{table}.json"))
    }

    fn index_path(&self, table: &str, column: &str) -> PathBuf {
        self.config.root.join(format!("{table}.{column}{INDEX_SUFFIX}"))
    }

    // --- Tables ---

    /// Whether a table file exists for `table`.
    pub fn table_exists(&self, table: &str) -> bool {
        check_name(table).is_ok() && self.table_path(table).is_file()
    }

    /// Fails with `TableNotFound` unless the table is persisted.
    pub fn validate_table_name(&self, table: &str) -> Result<()> {
        if self.table_exists(table) {
            Ok(())
        } else {
            Err(SchemaError::TableNotFound(table.to_string()).into())
        }
    }

    /// The schema stored in the table file.
    pub fn table_definition(&self, table: &str) -> Result<TableSchema> {
        self.load_table(table).map(|(_, schema)| schema)
    }

    /// Persists `schema` with an empty row sequence.
    pub fn create_table(&mut self, table: &str, schema: &TableSchema) -> Result<()> {
        check_name(table)?;
        for column in schema.columns() {
            check_name(&column.name)?;
        }
        if self.table_path(table).exists() {
            return Err(SchemaError::TableExists(table.to_string()).into());
        }
        self.write_table(&TableFile::new(table, schema))?;
        info!(table, columns = schema.len(), "table created");
        Ok(())
    }

    /// Removes the table file and every index built over the table.
    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        self.validate_table_name(table)?;

        for column in self.list_indexes(table)? {
            let path = self.index_path(table, &column);
            fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        }
        self.indexes.retain(|(t, _), _| t != table);

        let path = self.table_path(table);
        fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        info!(table, "table dropped");
        Ok(())
    }

    fn load_table(&self, table: &str) -> Result<(TableFile, TableSchema)> {
        check_name(table)?;
        let path = self.table_path(table);
        if !path.is_file() {
            return Err(SchemaError::TableNotFound(table.to_string()).into());
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let file: TableFile = serde_json::from_str(&text).map_err(|e| Error::corrupt(&path, e))?;
        let schema = file.schema().map_err(|e| Error::corrupt(&path, e))?;
        debug!(table, rows = file.data.len(), "table file read");
        Ok((file, schema))
    }

    fn decode_rows(&self, file: &TableFile, schema: &TableSchema) -> Result<Vec<Row>> {
        file.data
            .iter()
            .map(|record| {
                decode_row(schema, record)
                    .map_err(|reason| Error::corrupt(self.table_path(&file.table_name), reason))
            })
            .collect()
    }

    fn write_table(&self, file: &TableFile) -> Result<()> {
        let path = self.table_path(&file.table_name);
        let json = serde_json::to_string_pretty(file).map_err(|e| Error::corrupt(&path, e))?;
        fs::write(&path, json).map_err(|e| Error::io(&path, e))?;
        debug!(table = %file.table_name, rows = file.data.len(), "table file written");
        Ok(())
    }

    // --- Rows ---

    /// Number of rows in the table file.
    pub fn row_count(&self, table: &str) -> Result<usize> {
        self.load_table(table).map(|(file, _)| file.data.len())
    }

    /// Validates and appends `row`, then adds its keys to every index of the table.
    pub fn insert(&mut self, table: &str, row: &Row) -> Result<()> {
        let (mut file, schema) = self.load_table(table)?;
        let record = encode_row(table, &schema, row)?;

        let mut keys = Vec::new();
        for column in self.list_indexes(table)? {
            let key = index_key(table, &column, row)?;
            self.load_index(table, &column)?;
            keys.push((column, key));
        }

        file.data.push(record);
        self.write_table(&file)?;

        for (column, key) in keys {
            self.update_index(table, &column, |tree| tree.insert(key))?;
        }
        debug!(table, "row inserted");
        Ok(())
    }

    /// Looks `id` up in the index over [ID_COLUMN] and returns the first row
    /// carrying that id.
    ///
    /// This resolves rows by key. [Storage::update] and [Storage::delete]
    /// resolve them by position instead; the two agree only while no row has
    /// been removed or reordered.
    pub fn read(&mut self, table: &str, id: i64) -> Result<Option<Row>> {
        let (file, schema) = self.load_table(table)?;
        if !self.load_index(table, ID_COLUMN)?.contains(id) {
            return Ok(None);
        }

        let rows = self.decode_rows(&file, &schema)?;
        Ok(rows
            .into_iter()
            .find(|row| row.get(ID_COLUMN).and_then(Value::as_int) == Some(id)))
    }

    /// Replaces the row at `position` with `row` and moves changed keys in
    /// every index of the table.
    pub fn update(&mut self, table: &str, position: usize, row: &Row) -> Result<()> {
        let (mut file, schema) = self.load_table(table)?;
        check_position(table, position, file.data.len())?;
        let record = encode_row(table, &schema, row)?;
        let old = decode_row(&schema, &file.data[position])
            .map_err(|reason| Error::corrupt(self.table_path(table), reason))?;

        let mut moves = Vec::new();
        for column in self.list_indexes(table)? {
            let old_key = index_key(table, &column, &old)?;
            let new_key = index_key(table, &column, row)?;
            self.load_index(table, &column)?;
            if old_key != new_key {
                moves.push((column, old_key, new_key));
            }
        }

        file.data[position] = record;
        self.write_table(&file)?;

        // no rollback: a failure here leaves earlier indexes already moved
        for (column, old_key, new_key) in moves {
            self.update_index(table, &column, |tree| {
                tree.delete(old_key);
                tree.insert(new_key);
            })?;
        }
        debug!(table, position, "row updated");
        Ok(())
    }

    /// Removes the row at `position` and retracts its keys from every index
    /// of the table.
    pub fn delete(&mut self, table: &str, position: usize) -> Result<()> {
        let (mut file, schema) = self.load_table(table)?;
        check_position(table, position, file.data.len())?;
        let old = decode_row(&schema, &file.data[position])
            .map_err(|reason| Error::corrupt(self.table_path(table), reason))?;

        let mut keys = Vec::new();
        for column in self.list_indexes(table)? {
            let key = index_key(table, &column, &old)?;
            self.load_index(table, &column)?;
            keys.push((column, key));
        }

        file.data.remove(position);
        self.write_table(&file)?;

        for (column, key) in keys {
            self.update_index(table, &column, |tree| tree.delete(key))?;
        }
        debug!(table, position, "row deleted");
        Ok(())
    }

    // --- Scans ---

    /// Every row, in position order.
    pub fn read_all(&mut self, table: &str) -> Result<Vec<Row>> {
        self.query(table, &Predicate::all())
    }

    /// Every row projected onto `columns`.
    pub fn read_columns(&mut self, table: &str, columns: &[String]) -> Result<Vec<Row>> {
        self.query_columns(table, columns, &Predicate::all())
    }

    /// Rows accepted by `predicate`, in position order.
    pub fn query(&mut self, table: &str, predicate: &Predicate<'_>) -> Result<Vec<Row>> {
        Ok(self
            .scan(table, predicate)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    /// Filtered scan projected to `columns`, in the order given.
    pub fn query_columns(
        &mut self,
        table: &str,
        columns: &[String],
        predicate: &Predicate<'_>,
    ) -> Result<Vec<Row>> {
        let schema = self.table_definition(table)?;
        if let Some(unknown) = columns.iter().find(|c| !schema.contains(c)) {
            return Err(SchemaError::ColumnNotFound {
                table: table.to_string(),
                column: unknown.clone(),
            }
            .into());
        }

        Ok(self
            .scan(table, predicate)?
            .into_iter()
            .map(|(_, row)| row.project(columns))
            .collect())
    }

    /// Chooses how `predicate` will be answered on `table`.
    pub fn plan(&self, table: &str, predicate: &Predicate<'_>) -> ScanPlan {
        let Some(hint) = predicate.hint() else {
            return ScanPlan::Full;
        };
        if !self.has_index(table, &hint.column) {
            return ScanPlan::Full;
        }
        match hint.comparison.key_range(hint.value) {
            Some((low, high)) => ScanPlan::Index {
                column: hint.column.clone(),
                low,
                high,
            },
            None => ScanPlan::Full,
        }
    }

    /// Every row accepted by `predicate`, with its position in the table.
    pub fn scan(&mut self, table: &str, predicate: &Predicate<'_>) -> Result<Vec<(usize, Row)>> {
        let (file, schema) = self.load_table(table)?;
        let rows = self.decode_rows(&file, &schema)?;
        let plan = self.plan(table, predicate);
        debug!(table, ?plan, rows = rows.len(), "scan");

        let mut candidates = bitvec![0; rows.len()];
        match &plan {
            ScanPlan::Full => candidates.fill(true),
            ScanPlan::Index { column, low, high } => {
                let keys: HashSet<i64> = self
                    .load_index(table, column)?
                    .range_query(*low, *high)
                    .into_iter()
                    .collect();
                for (position, row) in rows.iter().enumerate() {
                    let hit = row
                        .get(column)
                        .and_then(Value::as_int)
                        .is_some_and(|key| keys.contains(&key));
                    candidates.set(position, hit);
                }
            }
        }

        let mut matched = Vec::new();
        for (position, row) in rows.into_iter().enumerate() {
            if candidates[position] && predicate.matches(&row)? {
                matched.push((position, row));
            }
        }
        Ok(matched)
    }

    // --- Indexes ---

    /// Builds a fresh index over `column` from the current rows and persists
    /// it, replacing any previous index on that column.
    pub fn create_index(&mut self, table: &str, column: &str) -> Result<()> {
        let (file, schema) = self.load_table(table)?;
        let definition = schema.column(column).ok_or_else(|| SchemaError::ColumnNotFound {
            table: table.to_string(),
            column: column.to_string(),
        })?;
        if definition.data_type != DataType::Int {
            return Err(Error::type_error(format!(
                "Cannot index {table}.{column}: only INT columns can be indexed."
            )));
        }

        let mut tree = BTree::new(self.config.index_degree);
        for row in self.decode_rows(&file, &schema)? {
            tree.insert(index_key(table, column, &row)?);
        }

        write_index_file(&self.index_path(table, column), &tree)?;
        info!(table, column, keys = tree.len(), "index created");
        self.indexes
            .insert((table.to_string(), column.to_string()), tree);
        Ok(())
    }

    /// Whether `table.column` has an index, cached or on disk.
    pub fn has_index(&self, table: &str, column: &str) -> bool {
        if check_name(table).is_err() || check_name(column).is_err() {
            return false;
        }
        self.indexes
            .contains_key(&(table.to_string(), column.to_string()))
            || self.index_path(table, column).is_file()
    }

    /// The index over `table.column`, loading it on first use.
    pub fn get_index(&mut self, table: &str, column: &str) -> Result<&BTree> {
        self.validate_table_name(table)?;
        let tree = self.load_index(table, column)?;
        Ok(&*tree)
    }

    /// Removes the index file and evicts the cached tree.
    pub fn drop_index(&mut self, table: &str, column: &str) -> Result<()> {
        check_name(table)?;
        check_name(column)?;
        let path = self.index_path(table, column);
        let cached = self
            .indexes
            .remove(&(table.to_string(), column.to_string()))
            .is_some();

        if path.is_file() {
            fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        } else if !cached {
            return Err(SchemaError::IndexNotFound {
                table: table.to_string(),
                column: column.to_string(),
            }
            .into());
        }
        info!(table, column, "index dropped");
        Ok(())
    }

    /// Columns of `table` that have an index file, sorted by name.
    pub fn list_indexes(&self, table: &str) -> Result<Vec<String>> {
        let root = &self.config.root;
        let prefix = format!("{table}.");
        let mut columns = Vec::new();

        for entry in fs::read_dir(root).map_err(|e| Error::io(root, e))? {
            let entry = entry.map_err(|e| Error::io(root, e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let column = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(INDEX_SUFFIX));
            if let Some(column) = column.filter(|c| !c.is_empty() && !c.contains('.')) {
                columns.push(column.to_string());
            }
        }
        columns.sort();
        Ok(columns)
    }

    /// Bytes allocated by the index over `table.column`.
    pub fn index_footprint(&mut self, table: &str, column: &str) -> Result<usize> {
        let tree = self.load_index(table, column)?;
        Ok(allocative::size_of_unique(&*tree))
    }

    fn load_index(&mut self, table: &str, column: &str) -> Result<&mut BTree> {
        check_name(column)?;
        let path = self.index_path(table, column);
        match self.indexes.entry((table.to_string(), column.to_string())) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                if !path.is_file() {
                    return Err(SchemaError::IndexNotFound {
                        table: table.to_string(),
                        column: column.to_string(),
                    }
                    .into());
                }
                let tree = read_index_file(&path)?;
                debug!(
                    table,
                    column,
                    bytes = allocative::size_of_unique(&tree),
                    "index loaded"
                );
                Ok(entry.insert(tree))
            }
        }
    }

    fn update_index(
        &mut self,
        table: &str,
        column: &str,
        mutate: impl FnOnce(&mut BTree),
    ) -> Result<()> {
        let path = self.index_path(table, column);
        let tree = self.load_index(table, column)?;
        mutate(&mut *tree);
        write_index_file(&path, tree)
    }
}

/// Table and column names end up in file names, so they may not be empty or
/// contain a dot or a path separator.
fn check_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name
            .chars()
            .any(|c| c == '.' || c == '/' || c == '\\' || c == '\0');
    if invalid {
        Err(SchemaError::InvalidName(name.to_string()).into())
    } else {
        Ok(())
    }
}

fn check_position(table: &str, position: usize, len: usize) -> Result<()> {
    if position < len {
        Ok(())
    } else {
        Err(Error::Range {
            table: table.to_string(),
            position,
            len,
        })
    }
}

/// The integer an index over `column` stores for `row`.
fn index_key(table: &str, column: &str, row: &Row) -> Result<i64> {
    match row.get(column) {
        Some(Value::Int(key)) => Ok(*key),
        Some(other) => Err(Error::type_error(format!(
            "Index on {table}.{column} requires integer values, found {other}."
        ))),
        None => Err(Error::type_error(format!(
            "Index on {table}.{column} requires integer values, found nothing."
        ))),
    }
}

fn read_index_file(path: &Path) -> Result<BTree> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let tree = BTree::deserialize(&text).map_err(|e| Error::corrupt(path, e))?;
    tree.validate().map_err(|reason| Error::corrupt(path, reason))?;
    Ok(tree)
}

fn write_index_file(path: &Path, tree: &BTree) -> Result<()> {
    let json = tree.serialize().map_err(|e| Error::corrupt(path, e))?;
    fs::write(path, json).map_err(|e| Error::io(path, e))?;
    debug!(path = %path.display(), "index file written");
    Ok(())
}
