use std::collections::HashMap;
use std::sync::Arc;

use super::row::{CustomDbRow, index_columns};
use crate::types::RowValues;

/// A fully materialized result set.
///
/// This is what transform callbacks receive in place of a live reader: every row
/// has been read before the callback runs, so the callback can never hold the
/// connection open.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    /// The number of rows affected (for DML statements)
    pub rows_affected: usize,
    column_names: Option<Arc<Vec<String>>>,
    column_index: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    /// Create a new result set with a known capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            rows_affected: 0,
            column_names: None,
            column_index: None,
        }
    }

    /// Convenience constructor used by adapters and tests.
    #[must_use]
    pub fn from_rows(column_names: Vec<String>, rows: Vec<Vec<RowValues>>) -> ResultSet {
        let mut result_set = ResultSet::with_capacity(rows.len());
        result_set.set_column_names(Arc::new(column_names));
        for row in rows {
            result_set.add_row_values(row);
        }
        result_set
    }

    /// Set the column names for this result set (to be shared by all rows)
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_index = Some(Arc::new(index_columns(&column_names)));
        self.column_names = Some(column_names);
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Add a row to the result set. Rows added before the column names are set are ignored.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        if let (Some(column_names), Some(index)) = (&self.column_names, &self.column_index) {
            self.results.push(CustomDbRow {
                column_names: column_names.clone(),
                rows: row_values,
                column_index_cache: index.clone(),
            });
            self.rows_affected += 1;
        }
    }

    /// First row, if any.
    #[must_use]
    pub fn first(&self) -> Option<&CustomDbRow> {
        self.results.first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether the result set advertises a column with this name.
    #[must_use]
    pub fn has_column(&self, column_name: &str) -> bool {
        self.column_names.as_ref().is_some_and(|cols| {
            cols.iter()
                .any(|col| col == column_name || col.eq_ignore_ascii_case(column_name))
        })
    }
}
