use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tiberius::Query;

use super::connection::MssqlConnection;
use super::params::{bind_inputs, bind_value, sql_type_from_name};
use super::procedure::{ProcedureBatch, apply_outputs, build_batch, total_rows_affected};
use super::query::{build_result_set, result_set_from_rows};
use crate::adapter::{ServerInfo, VendorAdapter, run_with_timeout};
use crate::command::{Command, DbParameter, RETURN_PARAMETER_NAME};
use crate::error::SqlResilienceError;
use crate::results::ResultSet;
use crate::types::{CommandKind, DatabaseType, ParameterDirection, RowValues, SqlType, ValueKind};

const TEXTUAL_TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
];

const DERIVE_PARAMETERS_SQL: &str = "SELECT o.object_id, p.name, TYPE_NAME(p.user_type_id) AS type_name, p.max_length, p.is_output \
     FROM (SELECT OBJECT_ID(@P1) AS object_id) AS o \
     LEFT JOIN sys.parameters AS p ON p.object_id = o.object_id \
     ORDER BY p.parameter_id";

/// SQL Server through tiberius.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlAdapter;

impl MssqlAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// A cancelled tiberius future leaves the client mid-stream; drop it so the
/// next attempt reconnects.
fn discard_client_on_timeout<T>(conn: &mut MssqlConnection, result: &Result<T, SqlResilienceError>) {
    if matches!(result, Err(SqlResilienceError::CommandTimeout(_))) {
        conn.client = None;
    }
}

impl MssqlAdapter {
    /// A procedure call with no output slots, counted the way the server
    /// reports it.
    async fn execute_procedure(
        conn: &mut MssqlConnection,
        command: &Command,
        batch: ProcedureBatch,
    ) -> Result<u64, SqlResilienceError> {
        let client = conn.client()?;
        run_with_timeout(command.timeout, &command.text, async {
            let mut query = Query::new(batch.sql);
            for value in &batch.inputs {
                bind_value(&mut query, value);
            }
            let done = query.execute(client).await?;
            Ok(total_rows_affected(done.rows_affected()))
        })
        .await
    }

    /// Transaction control under the connection's command timeout.
    async fn run_control(conn: &mut MssqlConnection, sql: &str) -> Result<(), SqlResilienceError> {
        let timeout = conn.command_timeout();
        let result = run_with_timeout(timeout, sql, conn.run_batch(sql)).await;
        discard_client_on_timeout(conn, &result);
        result
    }

    async fn run_procedure(
        conn: &mut MssqlConnection,
        command: &Command,
        batch: ProcedureBatch,
    ) -> Result<Vec<ResultSet>, SqlResilienceError> {
        let client = conn.client()?;
        run_with_timeout(command.timeout, &command.text, async {
            let mut query = Query::new(batch.sql);
            for value in &batch.inputs {
                bind_value(&mut query, value);
            }
            let sets = query.query(client).await?.into_results().await?;
            Ok(sets.iter().map(|rows| result_set_from_rows(rows)).collect())
        })
        .await
    }
}

#[async_trait]
impl VendorAdapter for MssqlAdapter {
    type Connection = MssqlConnection;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn create_connection(
        &self,
        connection_string: &str,
        custom_timeout: Option<Duration>,
    ) -> Result<MssqlConnection, SqlResilienceError> {
        MssqlConnection::from_ado_string(connection_string, custom_timeout)
    }

    fn convert_vendor_value(&self, raw: &RowValues, kind: ValueKind) -> Option<RowValues> {
        match (raw, kind) {
            (RowValues::Text(text), ValueKind::Timestamp) => {
                let text = text.trim();
                TEXTUAL_TIMESTAMP_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                    .or_else(|| {
                        NaiveDate::parse_from_str(text, "%Y-%m-%d")
                            .ok()
                            .map(|d| d.and_time(chrono::NaiveTime::MIN))
                    })
                    .map(RowValues::Timestamp)
            }
            // BIT columns surface as integers through some conversions
            (RowValues::Int(v), ValueKind::Bool) => Some(RowValues::Bool(*v != 0)),
            _ => None,
        }
    }

    fn server_info(&self, conn: &MssqlConnection) -> ServerInfo {
        conn.server_info().clone()
    }

    fn is_open(&self, conn: &MssqlConnection) -> bool {
        conn.is_open()
    }

    fn command_timeout(&self, conn: &MssqlConnection) -> Option<Duration> {
        conn.command_timeout()
    }

    async fn open(&self, conn: &mut MssqlConnection) -> Result<(), SqlResilienceError> {
        conn.open().await
    }

    async fn close(&self, conn: &mut MssqlConnection) {
        conn.close().await;
    }

    async fn begin_transaction(&self, conn: &mut MssqlConnection) -> Result<(), SqlResilienceError> {
        Self::run_control(conn, "BEGIN TRANSACTION").await
    }

    async fn commit(&self, conn: &mut MssqlConnection) -> Result<(), SqlResilienceError> {
        Self::run_control(conn, "COMMIT TRANSACTION").await
    }

    async fn discard_transaction(&self, conn: &mut MssqlConnection) {
        if !conn.is_open() {
            return;
        }
        if let Err(e) = Self::run_control(conn, "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
            tracing::warn!("MSSQL rollback of abandoned transaction failed, closing connection: {e}");
            conn.close().await;
        }
    }

    async fn execute_non_query(
        &self,
        conn: &mut MssqlConnection,
        command: &mut Command,
    ) -> Result<u64, SqlResilienceError> {
        let result = match command.kind {
            CommandKind::Text => {
                let client = conn.client()?;
                let mut query = Query::new(command.text.clone());
                bind_inputs(&mut query, command.parameters().iter());
                run_with_timeout(command.timeout, &command.text, async {
                    let done = query.execute(client).await?;
                    Ok(done.rows_affected().iter().sum())
                })
                .await
            }
            CommandKind::StoredProcedure => {
                let batch = build_batch(command);
                if batch.selects_outputs {
                    Self::run_procedure(conn, command, batch)
                        .await
                        .map(|sets| {
                            sets.last()
                                .map_or(0, |outputs| apply_outputs(command, outputs))
                        })
                } else {
                    Self::execute_procedure(conn, command, batch).await
                }
            }
        };
        discard_client_on_timeout(conn, &result);
        result
    }

    async fn execute_reader(
        &self,
        conn: &mut MssqlConnection,
        command: &mut Command,
    ) -> Result<ResultSet, SqlResilienceError> {
        let result = match command.kind {
            CommandKind::Text => {
                let client = conn.client()?;
                let mut query = Query::new(command.text.clone());
                bind_inputs(&mut query, command.parameters().iter());
                run_with_timeout(command.timeout, &command.text, async {
                    build_result_set(query.query(client).await?).await
                })
                .await
            }
            CommandKind::StoredProcedure => {
                let batch = build_batch(command);
                let selects_outputs = batch.selects_outputs;
                Self::run_procedure(conn, command, batch)
                    .await
                    .map(|mut sets| {
                        if selects_outputs {
                            let outputs = sets.pop().unwrap_or_default();
                            apply_outputs(command, &outputs);
                        }
                        sets.into_iter().next().unwrap_or_default()
                    })
            }
        };
        discard_client_on_timeout(conn, &result);
        result
    }

    async fn derive_parameters(
        &self,
        conn: &mut MssqlConnection,
        command: &mut Command,
    ) -> Result<bool, SqlResilienceError> {
        let mut query = Query::new(DERIVE_PARAMETERS_SQL);
        query.bind(command.text.clone());
        let result = match conn.client() {
            Ok(client) => {
                run_with_timeout(command.timeout, DERIVE_PARAMETERS_SQL, async {
                    Ok(query.query(client).await?.into_first_result().await?)
                })
                .await
            }
            Err(e) => Err(e),
        };
        discard_client_on_timeout(conn, &result);
        let rows = result?;

        let exists = rows
            .first()
            .is_some_and(|row| matches!(row.try_get::<i32, _>("object_id"), Ok(Some(_))));
        if !exists {
            return Ok(false);
        }

        command.clear_parameters();
        let mut ret = DbParameter::new(RETURN_PARAMETER_NAME, None, Some(SqlType::Int));
        ret.direction = ParameterDirection::ReturnValue;
        command.add_parameter(ret)?;
        for row in &rows {
            let Some(name) = row.try_get::<&str, _>("name")? else {
                continue;
            };
            let type_name = row.try_get::<&str, _>("type_name")?.unwrap_or_default();
            let size = row
                .try_get::<i16, _>("max_length")?
                .and_then(|len| usize::try_from(len).ok());
            let is_output = row.try_get::<bool, _>("is_output")?.unwrap_or(false);
            let mut parameter = DbParameter::new(name, size, sql_type_from_name(type_name));
            if is_output {
                parameter.direction = ParameterDirection::InputOutput;
            }
            command.add_parameter(parameter)?;
        }
        Ok(true)
    }
}
