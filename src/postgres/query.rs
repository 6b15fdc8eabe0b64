use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use serde_json::Value;
use tokio_postgres::types::Type;
use tokio_postgres::{Column, Row};

use crate::error::DriverError;
use crate::results::QueryResult;
use crate::types::RowValues;

/// Decode `rows` using `columns` for names and types.
///
/// # Errors
/// Returns `DriverError` if a value cannot be decoded.
pub fn build_result(columns: &[Column], rows: &[Row]) -> Result<QueryResult, DriverError> {
    let started = Instant::now();
    let column_names: Vec<String> = columns.iter().map(|col| col.name().to_string()).collect();
    let column_count = column_names.len();

    let mut decoded = Vec::with_capacity(rows.len());
    for row in rows {
        let mut row_values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            row_values.push(extract_value(row, idx)?);
        }
        decoded.push(row_values);
    }

    Ok(QueryResult::with_rows(Arc::new(column_names), decoded).with_decode_time(started.elapsed()))
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `DriverError` if the column cannot be retrieved.
pub fn extract_value(row: &Row, idx: usize) -> Result<RowValues, DriverError> {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::INT2 => {
            let val: Option<i16> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v)))
        }
        Type::INT4 => {
            let val: Option<i32> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v)))
        }
        Type::INT8 => {
            let val: Option<i64> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Int)
        }
        Type::FLOAT4 => {
            let val: Option<f32> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Float(f64::from(v)))
        }
        Type::FLOAT8 => {
            let val: Option<f64> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Float)
        }
        Type::BOOL => {
            let val: Option<bool> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Bool)
        }
        Type::TIMESTAMP => {
            let val: Option<NaiveDateTime> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Timestamp)
        }
        Type::TIMESTAMPTZ => {
            let val: Option<chrono::DateTime<chrono::Utc>> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Timestamp(v.naive_utc()))
        }
        Type::JSON | Type::JSONB => {
            let val: Option<Value> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::JSON)
        }
        Type::BYTEA => {
            let val: Option<Vec<u8>> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Blob)
        }
        // text, varchar, bpchar, name, and anything else with a text form
        _ => {
            let val: Option<String> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Text)
        }
    };
    Ok(value)
}
