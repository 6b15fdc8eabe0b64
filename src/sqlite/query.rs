use std::sync::Arc;
use std::time::Instant;

use rusqlite::types::Value;
use rusqlite::{Statement, params_from_iter};

use crate::error::DriverError;
use crate::results::QueryResult;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns `DriverError` if the value cannot be read.
pub fn extract_value(row: &rusqlite::Row, idx: usize) -> Result<RowValues, DriverError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Run a prepared statement. Statements with a projection (including `RETURNING`) return their
/// rows; anything else returns the affected row count.
///
/// # Errors
/// Returns `DriverError` if execution or decoding fails.
pub fn run_statement(stmt: &mut Statement<'_>, params: &[Value]) -> Result<QueryResult, DriverError> {
    if stmt.column_count() == 0 {
        let affected = stmt.execute(params_from_iter(params.iter()))?;
        return Ok(QueryResult::affected(affected));
    }
    build_result(stmt, params)
}

/// Build a result from a `SQLite` query.
///
/// # Errors
/// Returns `DriverError` if query execution or result processing fails.
pub fn build_result(stmt: &mut Statement<'_>, params: &[Value]) -> Result<QueryResult, DriverError> {
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let started = Instant::now();
    let mut rows_iter = stmt.query(params_from_iter(params.iter()))?;
    let mut rows = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(extract_value(row, i)?);
        }
        rows.push(row_values);
    }

    Ok(QueryResult::with_rows(Arc::new(column_names), rows).with_decode_time(started.elapsed()))
}
