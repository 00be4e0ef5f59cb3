use chrono::{NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde_json::Value as JsonValue;

/// Values that can be stored in a database row or used as command parameters.
///
/// The same enum flows through every backend so the binder and the coercion
/// layer never branch on driver types:
/// ```rust
/// use sql_resilience::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::from(None::<i64>),
/// ];
/// assert!(params[2].is_null());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Variant name, used in conversion errors and parameter dumps.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            RowValues::Int(_) => "Int",
            RowValues::Float(_) => "Float",
            RowValues::Text(_) => "Text",
            RowValues::Bool(_) => "Bool",
            RowValues::Timestamp(_) => "Timestamp",
            RowValues::Null => "Null",
            RowValues::JSON(_) => "JSON",
            RowValues::Blob(_) => "Blob",
        }
    }

    /// Human readable rendering for diagnostics; blobs are summarised by length.
    #[must_use]
    pub fn display_value(&self) -> String {
        match self {
            RowValues::Int(i) => i.to_string(),
            RowValues::Float(f) => f.to_string(),
            RowValues::Text(s) => s.clone(),
            RowValues::Bool(b) => b.to_string(),
            RowValues::Timestamp(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            RowValues::Null => "NULL".to_string(),
            RowValues::JSON(js) => js.to_string(),
            RowValues::Blob(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<i32> for RowValues {
    fn from(value: i32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<i16> for RowValues {
    fn from(value: i16) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<u32> for RowValues {
    fn from(value: u32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<f32> for RowValues {
    fn from(value: f32) -> Self {
        RowValues::Float(f64::from(value))
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_string())
    }
}

impl From<NaiveDateTime> for RowValues {
    fn from(value: NaiveDateTime) -> Self {
        RowValues::Timestamp(value)
    }
}

impl From<NaiveDate> for RowValues {
    fn from(value: NaiveDate) -> Self {
        RowValues::Timestamp(value.and_time(chrono::NaiveTime::MIN))
    }
}

impl From<JsonValue> for RowValues {
    fn from(value: JsonValue) -> Self {
        RowValues::JSON(value)
    }
}

impl From<Vec<u8>> for RowValues {
    fn from(value: Vec<u8>) -> Self {
        RowValues::Blob(value)
    }
}

/// `None` is the DB-null sentinel; the binder rejects it.
impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValues::Null, Into::into)
    }
}

/// The kind of value a coercion is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Float,
    Text,
    Bool,
    Timestamp,
    Json,
    Blob,
}

/// Vendor-neutral parameter type tag; each adapter maps it onto its own dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    BigInt,
    Int,
    SmallInt,
    Bit,
    Float,
    Decimal,
    VarChar,
    NVarChar,
    Text,
    Date,
    DateTime,
    Binary,
    Json,
}

/// How the command text is interpreted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Text,
    StoredProcedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterDirection {
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParameterDirection {
    /// True for every direction whose value is written back by the server.
    #[must_use]
    pub fn is_output(self) -> bool {
        !matches!(self, ParameterDirection::Input)
    }
}

/// The database type a vendor adapter talks to
#[derive(Debug, Clone, PartialEq, Eq, Hash, ValueEnum)]
pub enum DatabaseType {
    /// `PostgreSQL` database
    #[cfg(feature = "postgres")]
    Postgres,
    /// SQL Server database
    #[cfg(feature = "mssql")]
    Mssql,
    /// Scripted in-memory driver used by the test-suite
    #[cfg(any(test, feature = "test-utils"))]
    Stub,
}
