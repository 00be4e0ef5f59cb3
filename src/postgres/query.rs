use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tokio_postgres::types::Type;
use tokio_postgres::{Row, Statement};

use super::numeric::PgNumeric;
use crate::error::SqlResilienceError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `SqlResilienceError` if the column cannot be retrieved.
pub(super) fn postgres_extract_value(row: &Row, idx: usize) -> Result<RowValues, SqlResilienceError> {
    let type_info = row.columns()[idx].type_();

    let value = match *type_info {
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(|v| RowValues::Int(i64::from(v))),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(|v| RowValues::Int(i64::from(v))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(RowValues::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| RowValues::Float(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(RowValues::Float),
        Type::NUMERIC => row
            .try_get::<_, Option<PgNumeric>>(idx)?
            .map(|n| RowValues::Float(n.0)),
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(RowValues::Bool),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(RowValues::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|dt| RowValues::Timestamp(dt.naive_utc())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| RowValues::Timestamp(d.and_time(chrono::NaiveTime::MIN))),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?.map(RowValues::JSON),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(RowValues::Blob),
        Type::VOID => None,
        // text, varchar, bpchar, name and anything else with a string form
        _ => row.try_get::<_, Option<String>>(idx)?.map(RowValues::Text),
    };
    Ok(value.unwrap_or(RowValues::Null))
}

/// Build a result set using statement metadata for column names, so an empty
/// result still reports its columns.
///
/// # Errors
/// Returns errors from row value extraction.
pub(super) fn build_result_set_from_statement(
    stmt: &Statement,
    rows: &[Row],
) -> Result<ResultSet, SqlResilienceError> {
    let column_names: Vec<String> = stmt
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let column_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(rows.len());
    result_set.set_column_names(Arc::new(column_names));

    for row in rows {
        let mut row_values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            row_values.push(postgres_extract_value(row, idx)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}
