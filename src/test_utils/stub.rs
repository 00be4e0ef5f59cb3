use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::time::Instant;

use crate::adapter::{ServerInfo, VendorAdapter};
use crate::command::{Command, DbParameter};
use crate::error::SqlResilienceError;
use crate::results::ResultSet;
use crate::types::{CommandKind, DatabaseType, RowValues, ValueKind};

const STUB_TIMESTAMP_FORMAT: &str = "%d-%b-%y %I.%M.%S%.f %p";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum Outcome {
    Rows(ResultSet),
    Affected(u64),
    Error(String),
    Timeout,
}

/// One scripted reply to an execute call.
#[derive(Debug, Clone)]
pub struct StubResponse {
    outcome: Outcome,
    outputs: Vec<(String, RowValues)>,
}

impl StubResponse {
    #[must_use]
    pub fn rows(columns: &[&str], rows: Vec<Vec<RowValues>>) -> Self {
        let columns = columns.iter().map(|c| (*c).to_string()).collect();
        Self::from_outcome(Outcome::Rows(ResultSet::from_rows(columns, rows)))
    }

    #[must_use]
    pub fn affected(count: u64) -> Self {
        Self::from_outcome(Outcome::Affected(count))
    }

    /// A non-timeout driver failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self::from_outcome(Outcome::Error(message.into()))
    }

    /// A driver command timeout.
    #[must_use]
    pub fn timeout() -> Self {
        Self::from_outcome(Outcome::Timeout)
    }

    /// Value the "server" writes into an output or return parameter.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.outputs.push((name.into(), value.into()));
        self
    }

    fn from_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            outputs: Vec::new(),
        }
    }
}

/// A command as the stub received it.
#[derive(Debug, Clone)]
pub struct ExecutedCommand {
    pub text: String,
    pub kind: CommandKind,
    pub parameters: Vec<DbParameter>,
    pub timeout: Option<Duration>,
    pub at: Instant,
    pub in_transaction: bool,
}

/// Everything the stub observed, in order.
#[derive(Debug, Clone)]
pub enum StubEvent {
    Connect { connection_string: String },
    Open,
    Close,
    Begin,
    Commit,
    Discard,
    Derive { procedure: String },
    Execute(ExecutedCommand),
}

#[derive(Debug, Default)]
struct StubState {
    script: VecDeque<StubResponse>,
    fallback: Option<StubResponse>,
    signatures: HashMap<String, Vec<DbParameter>>,
    fail_connect: Option<String>,
    events: Vec<StubEvent>,
}

/// Connection handed out by [`StubAdapter`].
#[derive(Debug, Clone, Default)]
pub struct StubConnection {
    pub connection_string: String,
    pub connect_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
    open: bool,
    in_transaction: bool,
}

impl StubConnection {
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            connect_timeout: None,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            open: false,
            in_transaction: false,
        }
    }

    /// Already-open connection, as a caller holding one across calls would have.
    #[must_use]
    pub fn opened(connection_string: impl Into<String>) -> Self {
        let mut conn = Self::new(connection_string);
        conn.open = true;
        conn
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn setting(&self, key: &str) -> String {
        self.connection_string
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
            .map(|(_, v)| v.trim().to_string())
            .unwrap_or_default()
    }
}

/// Scripted in-memory driver.
///
/// Responses are consumed in order, one per execute; when the script runs dry
/// the fallback response (default: `affected(0)`) is used. Clones share state,
/// so a test can keep a handle after moving one into an engine.
#[derive(Debug, Clone, Default)]
pub struct StubAdapter {
    state: Arc<Mutex<StubState>>,
}

impl StubAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a response for the next execute call.
    pub fn push_response(&self, response: StubResponse) -> &Self {
        self.state().script.push_back(response);
        self
    }

    /// Response used once the script is exhausted.
    pub fn set_fallback(&self, response: StubResponse) {
        self.state().fallback = Some(response);
    }

    /// Make `create_connection` fail.
    pub fn fail_connect(&self, message: impl Into<String>) {
        self.state().fail_connect = Some(message.into());
    }

    /// Signature returned by parameter derivation for `procedure`.
    pub fn set_signature(&self, procedure: impl Into<String>, parameters: Vec<DbParameter>) {
        self.state()
            .signatures
            .insert(procedure.into().to_ascii_lowercase(), parameters);
    }

    #[must_use]
    pub fn events(&self) -> Vec<StubEvent> {
        self.state().events.clone()
    }

    #[must_use]
    pub fn executions(&self) -> Vec<ExecutedCommand> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                StubEvent::Execute(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&StubEvent) -> bool) -> usize {
        self.state().events.iter().filter(|e| pred(e)).count()
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.count(|e| matches!(e, StubEvent::Open))
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.count(|e| matches!(e, StubEvent::Close))
    }

    #[must_use]
    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, StubEvent::Begin))
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, StubEvent::Commit))
    }

    #[must_use]
    pub fn discards(&self) -> usize {
        self.count(|e| matches!(e, StubEvent::Discard))
    }

    fn record(&self, event: StubEvent) {
        self.state().events.push(event);
    }

    fn execute(
        &self,
        conn: &StubConnection,
        command: &mut Command,
    ) -> Result<Outcome, SqlResilienceError> {
        if !conn.open {
            return Err(SqlResilienceError::ConnectionError(
                "ExecuteReader requires an open connection".to_string(),
            ));
        }
        let mut state = self.state();
        state.events.push(StubEvent::Execute(ExecutedCommand {
            text: command.text.clone(),
            kind: command.kind,
            parameters: command.parameters().to_vec(),
            timeout: command.timeout,
            at: Instant::now(),
            in_transaction: conn.in_transaction,
        }));
        let response = state
            .script
            .pop_front()
            .or_else(|| state.fallback.clone())
            .unwrap_or_else(|| StubResponse::affected(0));
        drop(state);

        for (name, value) in response.outputs {
            if let Some(parameter) = command.parameter_mut(&name) {
                if parameter.direction.is_output() {
                    parameter.value = value;
                }
            }
        }
        match response.outcome {
            Outcome::Error(message) => Err(SqlResilienceError::ExecutionError(message)),
            Outcome::Timeout => Err(SqlResilienceError::CommandTimeout(
                "The timeout period elapsed prior to completion of the operation or the server is not responding.".to_string(),
            )),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl VendorAdapter for StubAdapter {
    type Connection = StubConnection;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Stub
    }

    async fn create_connection(
        &self,
        connection_string: &str,
        custom_timeout: Option<Duration>,
    ) -> Result<StubConnection, SqlResilienceError> {
        if let Some(message) = self.state().fail_connect.clone() {
            return Err(SqlResilienceError::ConnectionError(message));
        }
        self.record(StubEvent::Connect {
            connection_string: connection_string.to_string(),
        });
        let mut conn = StubConnection::new(connection_string);
        conn.connect_timeout = custom_timeout;
        Ok(conn)
    }

    fn convert_vendor_value(&self, raw: &RowValues, kind: ValueKind) -> Option<RowValues> {
        match (raw, kind) {
            (RowValues::Text(text), ValueKind::Timestamp) => {
                NaiveDateTime::parse_from_str(text.trim(), STUB_TIMESTAMP_FORMAT)
                    .ok()
                    .map(RowValues::Timestamp)
            }
            _ => None,
        }
    }

    fn server_info(&self, conn: &StubConnection) -> ServerInfo {
        ServerInfo {
            server_name: conn.setting("Server"),
            database_name: conn.setting("Database"),
            user: conn.setting("User Id"),
        }
    }

    fn is_open(&self, conn: &StubConnection) -> bool {
        conn.open
    }

    fn command_timeout(&self, conn: &StubConnection) -> Option<Duration> {
        conn.command_timeout
    }

    async fn open(&self, conn: &mut StubConnection) -> Result<(), SqlResilienceError> {
        self.record(StubEvent::Open);
        conn.open = true;
        Ok(())
    }

    async fn close(&self, conn: &mut StubConnection) {
        if conn.open {
            self.record(StubEvent::Close);
        }
        conn.open = false;
        conn.in_transaction = false;
    }

    async fn begin_transaction(&self, conn: &mut StubConnection) -> Result<(), SqlResilienceError> {
        self.record(StubEvent::Begin);
        conn.in_transaction = true;
        Ok(())
    }

    async fn commit(&self, conn: &mut StubConnection) -> Result<(), SqlResilienceError> {
        self.record(StubEvent::Commit);
        conn.in_transaction = false;
        Ok(())
    }

    async fn discard_transaction(&self, conn: &mut StubConnection) {
        self.record(StubEvent::Discard);
        conn.in_transaction = false;
    }

    async fn execute_non_query(
        &self,
        conn: &mut StubConnection,
        command: &mut Command,
    ) -> Result<u64, SqlResilienceError> {
        match self.execute(conn, command)? {
            Outcome::Affected(count) => Ok(count),
            Outcome::Rows(rows) => Ok(rows.len() as u64),
            Outcome::Error(_) | Outcome::Timeout => Ok(0),
        }
    }

    async fn execute_reader(
        &self,
        conn: &mut StubConnection,
        command: &mut Command,
    ) -> Result<ResultSet, SqlResilienceError> {
        match self.execute(conn, command)? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Affected(count) => {
                let mut rows = ResultSet::default();
                rows.rows_affected = usize::try_from(count).unwrap_or(usize::MAX);
                Ok(rows)
            }
            Outcome::Error(_) | Outcome::Timeout => Ok(ResultSet::default()),
        }
    }

    async fn derive_parameters(
        &self,
        _conn: &mut StubConnection,
        command: &mut Command,
    ) -> Result<bool, SqlResilienceError> {
        self.record(StubEvent::Derive {
            procedure: command.text.clone(),
        });
        let signature = self
            .state()
            .signatures
            .get(&command.text.to_ascii_lowercase())
            .cloned();
        let Some(parameters) = signature else {
            return Ok(false);
        };
        command.clear_parameters();
        for parameter in parameters {
            command.add_parameter(parameter)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_responses_are_consumed_in_order() {
        let stub = StubAdapter::new();
        stub.push_response(StubResponse::affected(2))
            .push_response(StubResponse::error("boom"));
        let mut conn = StubConnection::opened("Server=s;Database=d");
        let mut cmd = Command::new("update t set x = 1", CommandKind::Text);

        assert_eq!(stub.execute_non_query(&mut conn, &mut cmd).await.unwrap(), 2);
        assert!(stub.execute_non_query(&mut conn, &mut cmd).await.is_err());
        assert_eq!(stub.execute_non_query(&mut conn, &mut cmd).await.unwrap(), 0);
        assert_eq!(stub.executions().len(), 3);
    }

    #[tokio::test]
    async fn closed_connections_cannot_execute() {
        let stub = StubAdapter::new();
        let mut conn = StubConnection::new("Server=s");
        let mut cmd = Command::new("select 1", CommandKind::Text);
        assert!(matches!(
            stub.execute_reader(&mut conn, &mut cmd).await,
            Err(SqlResilienceError::ConnectionError(_))
        ));
        assert!(stub.executions().is_empty());
    }

    #[test]
    fn server_info_comes_from_connection_string() {
        let stub = StubAdapter::new();
        let conn = StubConnection::new("Server=db01; Database=app; User Id=svc");
        let info = stub.server_info(&conn);
        assert_eq!(info.server_name, "db01");
        assert_eq!(info.database_name, "app");
        assert_eq!(info.user, "svc");
    }
}
