//! Row codec: typed [Row]s against a [TableSchema] to and from the untyped,
//! string-keyed JSON records kept in table files.

use serde_json::{Map, Number, Value as Json};

use crate::column::Column;
use crate::data_type::DataType;
use crate::error::{Error, Result, SchemaError};
use crate::table::{Row, TableSchema};
use crate::value::{DATETIME_FORMAT, Value};

/// On-disk row representation.
pub type Record = Map<String, Json>;

pub fn encode_value(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| Error::type_error(format!("Value {f} is not a finite float.")))?,
        Value::Text(s) => Json::String(s.to_string()),
        Value::Bool(b) => Json::Bool(*b),
        Value::DateTime(dt) => Json::String(dt.format(DATETIME_FORMAT).to_string()),
    })
}

/// Reads a JSON value as `data_type`. Returns `None` when it does not fit.
pub fn decode_value(json: &Json, data_type: DataType) -> Option<Value> {
    match (json, data_type) {
        (Json::Null, _) => Some(Value::Null),
        (Json::Number(n), DataType::Int) => n.as_i64().map(Value::Int),
        (Json::Number(n), DataType::Float) => n.as_f64().map(Value::Float),
        (Json::Bool(b), DataType::Bool) => Some(Value::Bool(*b)),
        (Json::String(s), DataType::String) => Some(Value::Text(s.as_str().into())),
        (Json::String(s), DataType::DateTime) => Value::parse_datetime(s).map(Value::DateTime),
        _ => None,
    }
}

/// Validates `row` against `schema` and lays it out in schema order.
///
/// Every schema column must be present, no unknown column may appear, and
/// each value must match its column type (`NULL` only where allowed).
pub fn encode_row(table: &str, schema: &TableSchema, row: &Row) -> Result<Record> {
    if let Some((unknown, _)) = row.iter().find(|(name, _)| !schema.contains(name)) {
        return Err(SchemaError::ColumnNotFound {
            table: table.to_string(),
            column: unknown.to_string(),
        }
        .into());
    }

    let missing: Vec<String> = schema
        .names()
        .filter(|name| !row.contains(name))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns(missing).into());
    }

    let mut record = Record::new();
    for column in schema.columns() {
        let value = row.get(&column.name).unwrap_or(&Value::Null);
        check_type(column, value)?;
        record.insert(column.name.clone(), encode_value(value)?);
    }
    Ok(record)
}

fn check_type(column: &Column, value: &Value) -> Result<()> {
    if column.accepts(value) {
        return Ok(());
    }
    if value.is_null() {
        return Err(Error::type_error(format!(
            "Column {} does not allow NULL.",
            column.name
        )));
    }
    Err(Error::type_error(format!(
        "Value {value} is not of type {}.",
        column.data_type
    )))
}

/// Reads a stored record back into a typed row in schema order.
///
/// The error string is meant to be wrapped with the offending file path.
pub fn decode_row(schema: &TableSchema, record: &Record) -> std::result::Result<Row, String> {
    schema
        .columns()
        .iter()
        .map(|column| {
            let json = record
                .get(&column.name)
                .ok_or_else(|| format!("record has no value for column {}", column.name))?;
            let value = decode_value(json, column.data_type).ok_or_else(|| {
                format!("value {json} is not of type {} in column {}", column.data_type, column.name)
            })?;
            Ok((column.name.clone(), value))
        })
        .collect()
}
