use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use futures_util::TryStreamExt;
use tiberius::numeric::Numeric;
use tiberius::{QueryStream, Row};

use crate::error::SqlResilienceError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Materialize the first result set of a query stream.
pub(super) async fn build_result_set(
    mut stream: QueryStream<'_>,
) -> Result<ResultSet, SqlResilienceError> {
    let column_names: Vec<String> = stream
        .columns()
        .await?
        .map(|columns| columns.iter().map(|col| col.name().to_string()).collect())
        .unwrap_or_default();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows = stream.into_row_stream();
    while let Some(row) = rows.try_next().await? {
        result_set.add_row_values(row_values(&row, col_count));
    }
    Ok(result_set)
}

/// Materialize one already-collected result set.
pub(super) fn result_set_from_rows(rows: &[Row]) -> ResultSet {
    let column_names: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let col_count = column_names.len();
    let mut result_set = ResultSet::with_capacity(rows.len());
    result_set.set_column_names(Arc::new(column_names));
    for row in rows {
        result_set.add_row_values(row_values(row, col_count));
    }
    result_set
}

fn row_values(row: &Row, col_count: usize) -> Vec<RowValues> {
    (0..col_count)
        .map(|idx| extract_value(row, idx).unwrap_or(RowValues::Null))
        .collect()
}

/// Extract a value from a row at a specific index by probing the supported
/// column types in turn. `None` means SQL NULL (or an unsupported type).
fn extract_value(row: &Row, idx: usize) -> Option<RowValues> {
    if let Ok(Some(val)) = row.try_get::<i32, _>(idx) {
        return Some(RowValues::Int(i64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<i64, _>(idx) {
        return Some(RowValues::Int(val));
    }
    if let Ok(Some(val)) = row.try_get::<i16, _>(idx) {
        return Some(RowValues::Int(i64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<u8, _>(idx) {
        return Some(RowValues::Int(i64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<f64, _>(idx) {
        return Some(RowValues::Float(val));
    }
    if let Ok(Some(val)) = row.try_get::<f32, _>(idx) {
        return Some(RowValues::Float(f64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<Numeric, _>(idx) {
        return Some(RowValues::Float(f64::from(val)));
    }
    if let Ok(Some(val)) = row.try_get::<bool, _>(idx) {
        return Some(RowValues::Bool(val));
    }
    if let Ok(Some(val)) = row.try_get::<NaiveDateTime, _>(idx) {
        return Some(RowValues::Timestamp(val));
    }
    if let Ok(Some(val)) = row.try_get::<NaiveDate, _>(idx) {
        return Some(RowValues::Timestamp(val.and_time(chrono::NaiveTime::MIN)));
    }
    if let Ok(Some(val)) = row.try_get::<&str, _>(idx) {
        return Some(RowValues::Text(val.to_string()));
    }
    if let Ok(Some(val)) = row.try_get::<&[u8], _>(idx) {
        return Some(RowValues::Blob(val.to_vec()));
    }
    None
}
