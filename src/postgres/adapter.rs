use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::connection::PostgresConnection;
use super::params::{as_sql_refs, sql_type_from_name};
use super::procedure::{CallShape, apply_outputs, build_call, split_routine_name};
use super::query::build_result_set_from_statement;
use crate::adapter::{ServerInfo, VendorAdapter, run_with_timeout};
use crate::command::{Command, DbParameter, RETURN_PARAMETER_NAME};
use crate::error::SqlResilienceError;
use crate::results::ResultSet;
use crate::types::{CommandKind, DatabaseType, ParameterDirection, RowValues, SqlType, ValueKind};

const TEXTUAL_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

// Overloads resolve to the first specific routine.
const DERIVE_PARAMETERS_SQL: &str = "SELECT r.specific_name::text AS specific_name, \
     r.routine_type::text AS routine_type, r.data_type::text AS return_type, \
     p.parameter_name::text AS parameter_name, p.data_type::text AS data_type, \
     p.parameter_mode::text AS parameter_mode, p.character_maximum_length::int4 AS max_length \
     FROM information_schema.routines AS r \
     LEFT JOIN information_schema.parameters AS p \
       ON p.specific_schema = r.specific_schema AND p.specific_name = r.specific_name \
     WHERE r.routine_name::text = $1::text AND ($2::text IS NULL OR r.routine_schema::text = $2::text) \
     ORDER BY r.specific_name, p.ordinal_position";

/// Postgres through tokio-postgres.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdapter;

impl PostgresAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Prepare and run `sql`, returning the rows with statement column names.
    async fn query_rows(
        conn: &PostgresConnection,
        sql: &str,
        values: &[&RowValues],
        timeout: Option<Duration>,
        label: &str,
    ) -> Result<ResultSet, SqlResilienceError> {
        let client = conn.client()?;
        let refs = as_sql_refs(values.iter().copied());
        run_with_timeout(timeout, label, async {
            let stmt = client.prepare(sql).await?;
            let rows = client.query(&stmt, &refs).await?;
            build_result_set_from_statement(&stmt, &rows)
        })
        .await
    }

    /// Transaction control under the connection's command timeout.
    async fn run_control(conn: &mut PostgresConnection, sql: &str) -> Result<(), SqlResilienceError> {
        let result = match conn.client() {
            Ok(client) => {
                run_with_timeout(conn.command_timeout(), sql, async {
                    Ok(client.batch_execute(sql).await?)
                })
                .await
            }
            Err(e) => Err(e),
        };
        discard_client_on_timeout(conn, &result);
        result
    }

    async fn run_routine(
        conn: &PostgresConnection,
        command: &mut Command,
        shape: CallShape,
    ) -> Result<ResultSet, SqlResilienceError> {
        let call = build_call(command, shape)?;
        let values: Vec<&RowValues> = call.inputs.iter().collect();
        let rows =
            Self::query_rows(conn, &call.sql, &values, command.timeout, &command.text).await?;
        if shape != CallShape::Rows {
            apply_outputs(command, &rows);
        }
        Ok(rows)
    }
}

/// The server keeps running a statement whose future was dropped; closing the
/// client ends the session so the next attempt starts clean.
fn discard_client_on_timeout<T>(
    conn: &mut PostgresConnection,
    result: &Result<T, SqlResilienceError>,
) {
    if matches!(result, Err(SqlResilienceError::CommandTimeout(_))) {
        conn.close();
    }
}

#[async_trait]
impl VendorAdapter for PostgresAdapter {
    type Connection = PostgresConnection;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn create_connection(
        &self,
        connection_string: &str,
        custom_timeout: Option<Duration>,
    ) -> Result<PostgresConnection, SqlResilienceError> {
        PostgresConnection::from_connection_string(connection_string, custom_timeout)
    }

    fn convert_vendor_value(&self, raw: &RowValues, kind: ValueKind) -> Option<RowValues> {
        let RowValues::Text(text) = raw else {
            return None;
        };
        let text = text.trim();
        match kind {
            ValueKind::Timestamp => TEXTUAL_TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .or_else(|| {
                    DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
                        .ok()
                        .map(|dt| dt.naive_utc())
                })
                .or_else(|| {
                    NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .ok()
                        .map(|d| d.and_time(chrono::NaiveTime::MIN))
                })
                .map(RowValues::Timestamp),
            // values a query cast to text
            ValueKind::Float => text.parse::<f64>().ok().map(RowValues::Float),
            ValueKind::Int => text.parse::<i64>().ok().map(RowValues::Int),
            _ => None,
        }
    }

    fn server_info(&self, conn: &PostgresConnection) -> ServerInfo {
        conn.server_info().clone()
    }

    fn is_open(&self, conn: &PostgresConnection) -> bool {
        conn.is_open()
    }

    fn command_timeout(&self, conn: &PostgresConnection) -> Option<Duration> {
        conn.command_timeout()
    }

    async fn open(&self, conn: &mut PostgresConnection) -> Result<(), SqlResilienceError> {
        conn.open().await
    }

    async fn close(&self, conn: &mut PostgresConnection) {
        conn.close();
    }

    async fn begin_transaction(
        &self,
        conn: &mut PostgresConnection,
    ) -> Result<(), SqlResilienceError> {
        Self::run_control(conn, "BEGIN").await
    }

    async fn commit(&self, conn: &mut PostgresConnection) -> Result<(), SqlResilienceError> {
        Self::run_control(conn, "COMMIT").await
    }

    async fn discard_transaction(&self, conn: &mut PostgresConnection) {
        if !conn.is_open() {
            return;
        }
        if let Err(e) = Self::run_control(conn, "ROLLBACK").await {
            tracing::warn!("Postgres rollback of abandoned transaction failed, closing connection: {e}");
            conn.close();
        }
    }

    async fn execute_non_query(
        &self,
        conn: &mut PostgresConnection,
        command: &mut Command,
    ) -> Result<u64, SqlResilienceError> {
        let result = match command.kind {
            CommandKind::Text => match conn.client() {
                Ok(client) => {
                    let refs = as_sql_refs(command.input_values().map(|p| &p.value));
                    run_with_timeout(command.timeout, &command.text, async {
                        Ok(client.execute(command.text.as_str(), &refs).await?)
                    })
                    .await
                }
                Err(e) => Err(e),
            },
            CommandKind::StoredProcedure => {
                let shape = CallShape::for_command(command, false);
                Self::run_routine(conn, command, shape)
                    .await
                    .map(|rows| match shape {
                        // CALL reports no row count
                        CallShape::Procedure => 0,
                        _ => rows.len() as u64,
                    })
            }
        };
        discard_client_on_timeout(conn, &result);
        result
    }

    async fn execute_reader(
        &self,
        conn: &mut PostgresConnection,
        command: &mut Command,
    ) -> Result<ResultSet, SqlResilienceError> {
        let result = match command.kind {
            CommandKind::Text => {
                let values: Vec<&RowValues> = command.input_values().map(|p| &p.value).collect();
                Self::query_rows(conn, &command.text, &values, command.timeout, &command.text).await
            }
            CommandKind::StoredProcedure => {
                Self::run_routine(conn, command, CallShape::Rows).await
            }
        };
        discard_client_on_timeout(conn, &result);
        result
    }

    async fn derive_parameters(
        &self,
        conn: &mut PostgresConnection,
        command: &mut Command,
    ) -> Result<bool, SqlResilienceError> {
        let (schema, routine) = split_routine_name(&command.text)?;
        let result = match conn.client() {
            Ok(client) => {
                run_with_timeout(command.timeout, DERIVE_PARAMETERS_SQL, async {
                    Ok(client
                        .query(DERIVE_PARAMETERS_SQL, &[&routine, &schema])
                        .await?)
                })
                .await
            }
            Err(e) => Err(e),
        };
        discard_client_on_timeout(conn, &result);
        let rows = result?;

        let Some(first) = rows.first() else {
            return Ok(false);
        };
        let specific: String = first.try_get("specific_name")?;
        let routine_type: String = first.try_get("routine_type")?;
        let return_type: Option<String> = first.try_get("return_type")?;

        command.clear_parameters();
        if routine_type.eq_ignore_ascii_case("FUNCTION") {
            let sql_type = return_type.as_deref().and_then(sql_type_from_name);
            let mut ret = DbParameter::new(RETURN_PARAMETER_NAME, None, sql_type);
            ret.direction = ParameterDirection::ReturnValue;
            command.add_parameter(ret)?;
        }
        for row in &rows {
            if row.try_get::<_, String>("specific_name")? != specific {
                break;
            }
            // unnamed arguments cannot be bound by name
            let Some(name) = row.try_get::<_, Option<String>>("parameter_name")? else {
                continue;
            };
            let type_name: Option<String> = row.try_get("data_type")?;
            let size = row
                .try_get::<_, Option<i32>>("max_length")?
                .and_then(|len| usize::try_from(len).ok());
            let mode: Option<String> = row.try_get("parameter_mode")?;
            let mut parameter = DbParameter::new(
                name,
                size,
                type_name.as_deref().and_then(sql_type_from_name),
            );
            parameter.direction = match mode.as_deref() {
                Some("OUT") => ParameterDirection::Output,
                Some("INOUT") => ParameterDirection::InputOutput,
                _ => ParameterDirection::Input,
            };
            command.add_parameter(parameter)?;
        }
        Ok(true)
    }
}
