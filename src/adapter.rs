//! The capability set every vendor driver supplies to the engine.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{Command, DbParameter};
use crate::error::SqlResilienceError;
use crate::results::ResultSet;
use crate::retry;
use crate::types::{DatabaseType, RowValues, SqlType, ValueKind};

/// Identity of the server a connection points at, rendered into diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub server_name: String,
    pub database_name: String,
    pub user: String,
}

/// Driver-specific plumbing behind the engine.
///
/// The engine is generic over this trait, so the adapter is resolved at compile
/// time. Connection objects are owned by the caller or by a single engine call;
/// adapters never keep them.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    type Connection: Send;

    fn database_type(&self) -> DatabaseType;

    /// Build a closed connection from a connection string, optionally overriding
    /// the connect timeout.
    async fn create_connection(
        &self,
        connection_string: &str,
        custom_timeout: Option<Duration>,
    ) -> Result<Self::Connection, SqlResilienceError>;

    fn create_parameter(
        &self,
        name: &str,
        size: Option<usize>,
        sql_type: Option<SqlType>,
    ) -> DbParameter {
        DbParameter::new(name, size, sql_type)
    }

    /// Override hook for coercion. Return `Some` to replace the raw value before
    /// the direct match; `None` declines.
    fn convert_vendor_value(&self, _raw: &RowValues, _kind: ValueKind) -> Option<RowValues> {
        None
    }

    fn is_command_timeout(&self, err: &SqlResilienceError) -> bool {
        retry::is_command_timeout(err)
    }

    fn server_info(&self, conn: &Self::Connection) -> ServerInfo;

    /// Diagnostic dump of a command. Never fails; whatever could be rendered is returned.
    fn describe_bound_parameters(&self, conn: &Self::Connection, command: &Command) -> String {
        render_command(command, &self.server_info(conn))
    }

    fn is_open(&self, conn: &Self::Connection) -> bool;

    /// Per-command timeout configured on the connection.
    fn command_timeout(&self, conn: &Self::Connection) -> Option<Duration>;

    async fn open(&self, conn: &mut Self::Connection) -> Result<(), SqlResilienceError>;

    /// Close and release server-side resources. Failures are logged, not returned.
    async fn close(&self, conn: &mut Self::Connection);

    async fn begin_transaction(&self, conn: &mut Self::Connection)
    -> Result<(), SqlResilienceError>;

    async fn commit(&self, conn: &mut Self::Connection) -> Result<(), SqlResilienceError>;

    /// Drop an uncommitted transaction on a connection the engine will not close.
    async fn discard_transaction(&self, conn: &mut Self::Connection);

    /// Execute and return the affected row count, writing output values back
    /// into `command`.
    async fn execute_non_query(
        &self,
        conn: &mut Self::Connection,
        command: &mut Command,
    ) -> Result<u64, SqlResilienceError>;

    /// Execute and materialize the first result set, writing output values back
    /// into `command`.
    async fn execute_reader(
        &self,
        conn: &mut Self::Connection,
        command: &mut Command,
    ) -> Result<ResultSet, SqlResilienceError>;

    /// Replace the command's parameters with the procedure signature read from
    /// the server. Returns `false` when nothing could be derived.
    async fn derive_parameters(
        &self,
        conn: &mut Self::Connection,
        command: &mut Command,
    ) -> Result<bool, SqlResilienceError>;
}

/// Run a driver future under the command timeout, reporting expiry as
/// [`SqlResilienceError::CommandTimeout`]. `None` or zero waits indefinitely.
#[cfg(any(feature = "mssql", feature = "postgres"))]
pub(crate) async fn run_with_timeout<T, F>(
    timeout: Option<Duration>,
    command_text: &str,
    fut: F,
) -> Result<T, SqlResilienceError>
where
    F: Future<Output = Result<T, SqlResilienceError>>,
{
    match timeout {
        Some(limit) if !limit.is_zero() => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| {
                SqlResilienceError::CommandTimeout(format!(
                    "The timeout period of {}s elapsed prior to completion of: {command_text}",
                    limit.as_secs()
                ))
            })?,
        _ => fut.await,
    }
}

/// Default rendering shared by the adapters.
#[must_use]
pub fn render_command(command: &Command, server: &ServerInfo) -> String {
    let mut out = String::from("Parameters: ");
    for (i, p) in command.parameters().iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let type_name = p
            .sql_type
            .map_or_else(|| p.value.type_name().to_string(), |t| format!("{t:?}"));
        let _ = write!(
            out,
            "[{} {type_name} {:?} = {}]",
            p.name,
            p.direction,
            p.value.display_value()
        );
    }
    let timeout = command
        .timeout
        .map_or_else(|| "default".to_string(), |t| format!("{}s", t.as_secs()));
    let _ = write!(
        out,
        ", CommandTimeout = {timeout}, CommandType = {:?}, CommandText = {}, DB Server Info: [ServerName = {}] [DatabaseName = {}] [User = {}]",
        command.kind, command.text, server.server_name, server.database_name, server.user
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommandKind, ParameterDirection};

    #[test]
    fn render_lists_parameters_in_binding_order() {
        let mut cmd = Command::new("dbo.GetUser", CommandKind::StoredProcedure);
        let mut a = DbParameter::new("@id", None, Some(SqlType::Int));
        a.value = RowValues::Int(5);
        let mut b = DbParameter::new("@name", None, None);
        b.value = RowValues::Text("x".into());
        b.direction = ParameterDirection::Output;
        cmd.add_parameter(a).unwrap();
        cmd.add_parameter(b).unwrap();
        cmd.timeout = Some(Duration::from_secs(30));

        let server = ServerInfo {
            server_name: "db01".into(),
            database_name: "app".into(),
            user: "svc".into(),
        };
        let text = render_command(&cmd, &server);
        assert!(text.starts_with("Parameters: [@id Int Input = 5] [@name Text Output = x]"));
        assert!(text.contains("CommandTimeout = 30s"));
        assert!(text.contains("CommandText = dbo.GetUser"));
        assert!(text.ends_with("[ServerName = db01] [DatabaseName = app] [User = svc]"));
    }
}
