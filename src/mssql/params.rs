use tiberius::Query;

use crate::command::DbParameter;
use crate::types::{ParameterDirection, RowValues, SqlType};

/// Bind one value onto a tiberius query.
pub(super) fn bind_value(query: &mut Query<'_>, value: &RowValues) {
    match value {
        RowValues::Int(i) => query.bind(*i),
        RowValues::Float(f) => query.bind(*f),
        RowValues::Text(s) => query.bind(s.clone()),
        RowValues::Bool(b) => query.bind(*b),
        RowValues::Timestamp(dt) => {
            query.bind(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
        RowValues::Null => query.bind(Option::<String>::None),
        RowValues::JSON(jsval) => query.bind(jsval.to_string()),
        RowValues::Blob(bytes) => query.bind(bytes.clone()),
    }
}

/// Bind the input values of a text command positionally (`@P1`, `@P2`, ...).
pub(super) fn bind_inputs<'a, 'p>(
    query: &mut Query<'a>,
    parameters: impl Iterator<Item = &'p DbParameter>,
) {
    for parameter in parameters {
        if matches!(
            parameter.direction,
            ParameterDirection::Input | ParameterDirection::InputOutput
        ) {
            bind_value(query, &parameter.value);
        }
    }
}

/// T-SQL declaration type for an output variable.
pub(super) fn tsql_type(parameter: &DbParameter) -> String {
    let sized = |base: &str| match parameter.size {
        Some(n) if n > 0 && n <= 8000 => format!("{base}({n})"),
        _ => format!("{base}(MAX)"),
    };
    let sql_type = parameter.sql_type.or_else(|| infer_type(&parameter.value));
    match sql_type {
        Some(SqlType::BigInt) => "BIGINT".to_string(),
        Some(SqlType::Int) => "INT".to_string(),
        Some(SqlType::SmallInt) => "SMALLINT".to_string(),
        Some(SqlType::Bit) => "BIT".to_string(),
        Some(SqlType::Float) => "FLOAT".to_string(),
        Some(SqlType::Decimal) => "DECIMAL(38, 10)".to_string(),
        Some(SqlType::VarChar) => sized("VARCHAR"),
        Some(SqlType::NVarChar) => sized("NVARCHAR"),
        Some(SqlType::Text | SqlType::Json) => "NVARCHAR(MAX)".to_string(),
        Some(SqlType::Date) => "DATE".to_string(),
        Some(SqlType::DateTime) => "DATETIME2".to_string(),
        Some(SqlType::Binary) => sized("VARBINARY"),
        None => "SQL_VARIANT".to_string(),
    }
}

fn infer_type(value: &RowValues) -> Option<SqlType> {
    match value {
        RowValues::Int(_) => Some(SqlType::BigInt),
        RowValues::Float(_) => Some(SqlType::Float),
        RowValues::Text(_) => Some(SqlType::NVarChar),
        RowValues::Bool(_) => Some(SqlType::Bit),
        RowValues::Timestamp(_) => Some(SqlType::DateTime),
        RowValues::JSON(_) => Some(SqlType::Json),
        RowValues::Blob(_) => Some(SqlType::Binary),
        RowValues::Null => None,
    }
}

/// `SqlType` for a `sys.types` name, as reported during parameter derivation.
pub(super) fn sql_type_from_name(type_name: &str) -> Option<SqlType> {
    let t = type_name.to_ascii_lowercase();
    Some(match t.as_str() {
        "bigint" => SqlType::BigInt,
        "int" => SqlType::Int,
        "smallint" | "tinyint" => SqlType::SmallInt,
        "bit" => SqlType::Bit,
        "float" | "real" => SqlType::Float,
        "decimal" | "numeric" | "money" | "smallmoney" => SqlType::Decimal,
        "varchar" | "char" => SqlType::VarChar,
        "nvarchar" | "nchar" => SqlType::NVarChar,
        "text" | "ntext" | "xml" => SqlType::Text,
        "date" => SqlType::Date,
        "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" => SqlType::DateTime,
        "binary" | "varbinary" | "image" => SqlType::Binary,
        _ => return None,
    })
}
