//! Value coercion from driver values to caller-requested Rust types.
//!
//! Every extraction path funnels through [`coerce_with`]: a driver null becomes
//! the target's `Default`, the vendor adapter gets the first chance to unwrap
//! driver-specific representations, and anything left over must match the
//! target exactly or fails with [`SqlResilienceError::InvalidConversion`].

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;

use crate::adapter::VendorAdapter;
use crate::command::Command;
use crate::error::SqlResilienceError;
use crate::results::ResultSet;
use crate::types::{RowValues, ValueKind};

/// A Rust type a driver value can be coerced into.
///
/// `Default` supplies the zero value returned for driver nulls and for
/// calls that fail under the `Log` action mode.
pub trait FromRowValue: Sized + Default {
    /// What the vendor override hook is asked to produce.
    const KIND: ValueKind;

    /// Strict conversion of a non-null value; `None` when the shapes differ.
    fn from_row_value(value: &RowValues) -> Option<Self>;
}

impl FromRowValue for i64 {
    const KIND: ValueKind = ValueKind::Int;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_int().copied()
    }
}

impl FromRowValue for i32 {
    const KIND: ValueKind = ValueKind::Int;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_int().and_then(|v| i32::try_from(*v).ok())
    }
}

impl FromRowValue for i16 {
    const KIND: ValueKind = ValueKind::Int;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_int().and_then(|v| i16::try_from(*v).ok())
    }
}

impl FromRowValue for u32 {
    const KIND: ValueKind = ValueKind::Int;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_int().and_then(|v| u32::try_from(*v).ok())
    }
}

impl FromRowValue for u64 {
    const KIND: ValueKind = ValueKind::Int;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_int().and_then(|v| u64::try_from(*v).ok())
    }
}

impl FromRowValue for f64 {
    const KIND: ValueKind = ValueKind::Float;
    #[allow(clippy::cast_precision_loss)]
    fn from_row_value(value: &RowValues) -> Option<Self> {
        match value {
            RowValues::Float(f) => Some(*f),
            RowValues::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromRowValue for f32 {
    const KIND: ValueKind = ValueKind::Float;
    #[allow(clippy::cast_possible_truncation)]
    fn from_row_value(value: &RowValues) -> Option<Self> {
        f64::from_row_value(value).map(|f| f as f32)
    }
}

impl FromRowValue for bool {
    const KIND: ValueKind = ValueKind::Bool;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_bool().copied()
    }
}

impl FromRowValue for String {
    const KIND: ValueKind = ValueKind::Text;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_text().map(str::to_string)
    }
}

impl FromRowValue for NaiveDateTime {
    const KIND: ValueKind = ValueKind::Timestamp;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_timestamp()
    }
}

impl FromRowValue for NaiveDate {
    const KIND: ValueKind = ValueKind::Timestamp;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_timestamp().map(|ts| ts.date())
    }
}

impl FromRowValue for JsonValue {
    const KIND: ValueKind = ValueKind::Json;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        if let RowValues::JSON(js) = value {
            Some(js.clone())
        } else {
            None
        }
    }
}

impl FromRowValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Blob;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        value.as_blob().map(<[u8]>::to_vec)
    }
}

/// `None` for nulls, so callers can tell null apart from a zero value.
impl<T: FromRowValue> FromRowValue for Option<T> {
    const KIND: ValueKind = T::KIND;
    fn from_row_value(value: &RowValues) -> Option<Self> {
        T::from_row_value(value).map(Some)
    }
}

fn invalid<T>(raw: &RowValues) -> SqlResilienceError {
    SqlResilienceError::InvalidConversion {
        source_type: raw.type_name(),
        target_type: std::any::type_name::<T>(),
    }
}

/// Coerce without a vendor override.
///
/// # Errors
/// `InvalidConversion` when a non-null value does not match `T`.
pub fn coerce<T: FromRowValue>(raw: &RowValues) -> Result<T, SqlResilienceError> {
    if raw.is_null() {
        return Ok(T::default());
    }
    T::from_row_value(raw).ok_or_else(|| invalid::<T>(raw))
}

/// Coerce, giving the adapter's `convert_vendor_value` hook the first try.
///
/// # Errors
/// `InvalidConversion` when neither the override nor a direct match produce a `T`.
pub fn coerce_with<T, A>(adapter: &A, raw: &RowValues) -> Result<T, SqlResilienceError>
where
    T: FromRowValue,
    A: VendorAdapter + ?Sized,
{
    if raw.is_null() {
        return Ok(T::default());
    }
    if let Some(converted) = adapter.convert_vendor_value(raw, T::KIND) {
        if converted.is_null() {
            return Ok(T::default());
        }
        if let Some(value) = T::from_row_value(&converted) {
            return Ok(value);
        }
    }
    T::from_row_value(raw).ok_or_else(|| invalid::<T>(raw))
}

/// Read one named column of the first row.
///
/// An empty result set yields `T::default()`.
///
/// # Errors
/// `ExecutionError` when the column is not part of the result set;
/// `InvalidConversion` from the coercion.
pub fn scalar_from_result_set<T, A>(
    adapter: &A,
    result_set: &ResultSet,
    column: &str,
) -> Result<T, SqlResilienceError>
where
    T: FromRowValue,
    A: VendorAdapter + ?Sized,
{
    let Some(row) = result_set.first() else {
        return Ok(T::default());
    };
    let raw = row.get(column).ok_or_else(|| {
        SqlResilienceError::ExecutionError(format!("column {column} not found in result set"))
    })?;
    coerce_with(adapter, raw)
}

/// Read an output or return parameter after execution.
///
/// # Errors
/// `InvalidParameter` for unknown or input-only parameters;
/// `InvalidConversion` from the coercion.
pub fn scalar_from_parameter<T, A>(
    adapter: &A,
    command: &Command,
    name: &str,
) -> Result<T, SqlResilienceError>
where
    T: FromRowValue,
    A: VendorAdapter + ?Sized,
{
    let parameter = command.parameter(name).ok_or_else(|| {
        SqlResilienceError::InvalidParameter(format!(
            "output parameter {name} does not exist on the command"
        ))
    })?;
    if !parameter.direction.is_output() {
        return Err(SqlResilienceError::InvalidParameter(format!(
            "parameter {name} is not an output parameter"
        )));
    }
    coerce_with(adapter, &parameter.value)
}
