use std::error::Error;

use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

use super::numeric::encode_numeric;
use crate::types::{RowValues, SqlType};

impl ToSql for RowValues {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match (self, ty) {
            (RowValues::Null, _) => Ok(IsNull::Yes),
            // integers are sized to the column the server inferred
            (RowValues::Int(i), &Type::INT2) => i16::try_from(*i)?.to_sql(ty, out),
            (RowValues::Int(i), &Type::INT4) => i32::try_from(*i)?.to_sql(ty, out),
            #[allow(clippy::cast_precision_loss)]
            (RowValues::Int(i), &Type::FLOAT8) => (*i as f64).to_sql(ty, out),
            #[allow(clippy::cast_precision_loss)]
            (RowValues::Int(i), &Type::FLOAT4) => (*i as f32).to_sql(ty, out),
            (RowValues::Int(i), &Type::BOOL) => (*i != 0).to_sql(ty, out),
            #[allow(clippy::cast_possible_truncation)]
            (RowValues::Float(f), &Type::FLOAT4) => (*f as f32).to_sql(ty, out),
            (RowValues::Int(_) | RowValues::Float(_), &Type::NUMERIC) => {
                encode_numeric(&self.display_value(), out)?;
                Ok(IsNull::No)
            }
            (RowValues::Int(_) | RowValues::Float(_), &Type::TEXT | &Type::VARCHAR) => {
                self.display_value().to_sql(ty, out)
            }
            (RowValues::Int(i), _) => (*i).to_sql(ty, out),
            (RowValues::Float(f), _) => (*f).to_sql(ty, out),
            (RowValues::Text(s), _) => s.to_sql(ty, out),
            (RowValues::Bool(b), _) => (*b).to_sql(ty, out),
            (RowValues::Timestamp(dt), &Type::DATE) => dt.date().to_sql(ty, out),
            (RowValues::Timestamp(dt), &Type::TIMESTAMPTZ) => dt.and_utc().to_sql(ty, out),
            (RowValues::Timestamp(dt), _) => dt.to_sql(ty, out),
            (RowValues::JSON(jsval), _) => jsval.to_sql(ty, out),
            (RowValues::Blob(bytes), _) => bytes.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::NUMERIC
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}

pub(super) fn as_sql_refs<'a>(
    values: impl IntoIterator<Item = &'a RowValues>,
) -> Vec<&'a (dyn ToSql + Sync)> {
    values
        .into_iter()
        .map(|v| v as &(dyn ToSql + Sync))
        .collect()
}

/// Placeholder for the `n`th value of a generated call, cast to the declared
/// type when there is one so overloads resolve the way the caller declared.
pub(super) fn placeholder(n: usize, sql_type: Option<SqlType>) -> String {
    sql_type.map_or_else(|| format!("${n}"), |t| format!("${n}::{}", pg_type(t)))
}

pub(super) fn pg_type(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::BigInt => "bigint",
        SqlType::Int => "integer",
        SqlType::SmallInt => "smallint",
        SqlType::Bit => "boolean",
        SqlType::Float => "double precision",
        SqlType::Decimal => "numeric",
        SqlType::VarChar | SqlType::NVarChar => "varchar",
        SqlType::Text => "text",
        SqlType::Date => "date",
        SqlType::DateTime => "timestamp",
        SqlType::Binary => "bytea",
        SqlType::Json => "jsonb",
    }
}

/// `SqlType` for an `information_schema` data type name.
pub(super) fn sql_type_from_name(type_name: &str) -> Option<SqlType> {
    let t = type_name.to_ascii_lowercase();
    Some(match t.as_str() {
        "bigint" => SqlType::BigInt,
        "integer" => SqlType::Int,
        "smallint" => SqlType::SmallInt,
        "boolean" => SqlType::Bit,
        "double precision" | "real" => SqlType::Float,
        "numeric" => SqlType::Decimal,
        "character varying" | "character" => SqlType::VarChar,
        "text" => SqlType::Text,
        "date" => SqlType::Date,
        "timestamp without time zone" | "timestamp with time zone" => SqlType::DateTime,
        "bytea" => SqlType::Binary,
        "json" | "jsonb" => SqlType::Json,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_fit_the_inferred_column() {
        let mut out = bytes::BytesMut::new();
        RowValues::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert_eq!(&out[..], &7i32.to_be_bytes());

        let mut out = bytes::BytesMut::new();
        assert!(RowValues::Int(i64::MAX).to_sql(&Type::INT2, &mut out).is_err());
    }

    #[test]
    fn numbers_bind_to_numeric_and_text() {
        let mut out = bytes::BytesMut::new();
        RowValues::Float(10.5).to_sql(&Type::TEXT, &mut out).unwrap();
        assert_eq!(&out[..], b"10.5");

        let mut out = bytes::BytesMut::new();
        RowValues::Int(50).to_sql(&Type::NUMERIC, &mut out).unwrap();
        assert_eq!(&out[..], &[0, 1, 0, 0, 0, 0, 0, 0, 0, 50]);
    }

    #[test]
    fn placeholders_carry_declared_casts() {
        assert_eq!(placeholder(1, None), "$1");
        assert_eq!(placeholder(2, Some(SqlType::Int)), "$2::integer");
        assert_eq!(placeholder(3, Some(SqlType::Decimal)), "$3::numeric");
    }

    #[test]
    fn schema_type_names_map_back() {
        assert_eq!(sql_type_from_name("character varying"), Some(SqlType::VarChar));
        assert_eq!(sql_type_from_name("NUMERIC"), Some(SqlType::Decimal));
        assert_eq!(sql_type_from_name("tsvector"), None);
    }
}
