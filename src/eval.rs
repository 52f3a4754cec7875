//! WHERE-clause evaluation against typed rows.
//!
//! A comparison reads its left operand from the row (a column, or a literal)
//! and takes its right operand as a literal. `=` and `<>` compare the stored
//! JSON forms, numbers by value. The ordering operators only know integers:
//! both sides are coerced with [as_integer] and a value that cannot be
//! coerced fails the whole statement.

use serde_json::Value as Json;

use crate::ast::{BinaryOp, Expr};
use crate::codec::encode_value;
use crate::error::{Error, Result};
use crate::storage::{Comparison, IndexHint};
use crate::table::Row;
use crate::value::Value;

/// Evaluates `expr` as a predicate over `row`.
///
/// # Errors
/// Returns a type error for an operand that is not a predicate, a right
/// operand that is not a literal, or an ordering comparison on a value with
/// no integer reading.
pub fn evaluate(expr: &Expr, row: &Row) -> Result<bool> {
    match expr {
        Expr::Nested(inner) => evaluate(inner, row),
        Expr::Not(inner) => Ok(!evaluate(inner, row)?),
        Expr::Literal(Value::Bool(b)) => Ok(*b),
        Expr::Column(name) => match lookup(name, row)? {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::type_error(format!(
                "Column {name} holds {other}, which is not a boolean."
            ))),
        },
        Expr::Literal(other) => Err(Error::type_error(format!(
            "Literal {other} is not a boolean."
        ))),
        Expr::Binary { left, op, right } => {
            if op.is_arithmetic() {
                return Err(Error::type_error(format!(
                    "Operator {} does not produce a boolean.",
                    op.symbol()
                )));
            }

            // a comparison used as an operand only makes sense nested
            let left = match left.unnested() {
                Expr::Binary { .. } | Expr::Not(_) => Value::Bool(evaluate(left, row)?),
                other => operand(other, row)?.clone(),
            };
            let right = literal(right, *op)?;
            compare(&left, *op, right)
        }
    }
}

fn lookup<'a>(name: &str, row: &'a Row) -> Result<&'a Value> {
    row.get(name)
        .ok_or_else(|| Error::type_error(format!("Column {name} is not part of the row.")))
}

fn operand<'a>(expr: &'a Expr, row: &'a Row) -> Result<&'a Value> {
    match expr {
        Expr::Column(name) => lookup(name, row),
        Expr::Literal(value) => Ok(value),
        _ => Err(Error::type_error(
            "Left operand must be a column or a literal.",
        )),
    }
}

fn literal(expr: &Expr, op: BinaryOp) -> Result<&Value> {
    match expr.unnested() {
        Expr::Literal(value) => Ok(value),
        _ => Err(Error::type_error(format!(
            "Right operand of {} must be a literal.",
            op.symbol()
        ))),
    }
}

fn compare(left: &Value, op: BinaryOp, right: &Value) -> Result<bool> {
    match op {
        BinaryOp::Eq => Ok(values_equal(left, right)?),
        BinaryOp::NotEq => Ok(!values_equal(left, right)?),
        _ => {
            let comparison = op.comparison().ok_or_else(|| {
                Error::type_error(format!("Operator {} is not a comparison.", op.symbol()))
            })?;
            Ok(comparison.holds(as_integer(left)?, as_integer(right)?))
        }
    }
}

/// Structural equality of the stored JSON forms. Numbers compare by
/// value, so `1 = 1.0` holds.
pub fn values_equal(left: &Value, right: &Value) -> Result<bool> {
    let (left, right) = (encode_value(left)?, encode_value(right)?);
    Ok(match (&left, &right) {
        (Json::Number(l), Json::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l == r,
            _ => l.as_f64() == r.as_f64(),
        },
        _ => left == right,
    })
}

/// The integer reading of a value for the ordering operators: INT as is,
/// FLOAT rounded half to even, BOOL as 0 or 1, STRING parsed in base 10.
pub fn as_integer(value: &Value) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.is_finite() => Ok(f.round_ties_even() as i64),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Text(s) => s.trim().parse::<i64>().map_err(|_| {
            Error::type_error(format!("Value '{s}' cannot be compared as an integer."))
        }),
        other => Err(Error::type_error(format!(
            "Value {other} cannot be compared as an integer."
        ))),
    }
}

/// An index hint for a WHERE clause of the form `column <op> <integer>`.
pub fn index_hint(expr: &Expr) -> Option<IndexHint> {
    let Expr::Binary { left, op, right } = expr.unnested() else {
        return None;
    };
    let (Expr::Column(column), Expr::Literal(Value::Int(value))) =
        (left.unnested(), right.unnested())
    else {
        return None;
    };
    let comparison: Comparison = op.comparison()?;
    Some(IndexHint::new(column.as_str(), comparison, *value))
}
