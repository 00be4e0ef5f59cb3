use std::time::Duration;

use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::adapter::ServerInfo;
use crate::error::SqlResilienceError;

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A SQL Server connection: parsed settings plus the live client while open.
pub struct MssqlConnection {
    config: Config,
    server: ServerInfo,
    connect_timeout: Duration,
    command_timeout: Option<Duration>,
    pub(super) client: Option<MssqlClient>,
}

fn ado_value<'a>(connection_string: &'a str, keys: &[&str]) -> Option<&'a str> {
    connection_string
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| keys.iter().any(|key| k.trim().eq_ignore_ascii_case(key)))
        .map(|(_, v)| v.trim())
}

fn seconds(connection_string: &str, keys: &[&str]) -> Result<Option<Duration>, SqlResilienceError> {
    ado_value(connection_string, keys)
        .map(|raw| {
            raw.parse::<u64>().map(Duration::from_secs).map_err(|e| {
                SqlResilienceError::ConfigError(format!("invalid {} value {raw:?}: {e}", keys[0]))
            })
        })
        .transpose()
}

impl MssqlConnection {
    /// Parse an ADO.NET style connection string without connecting.
    ///
    /// # Errors
    /// `MssqlError` when tiberius rejects the string, `ConfigError` for bad timeouts.
    pub fn from_ado_string(
        connection_string: &str,
        custom_timeout: Option<Duration>,
    ) -> Result<Self, SqlResilienceError> {
        let config = Config::from_ado_string(connection_string)?;
        let server = ServerInfo {
            server_name: ado_value(connection_string, &["Server", "Data Source", "Address"])
                .unwrap_or_default()
                .to_string(),
            database_name: ado_value(connection_string, &["Database", "Initial Catalog"])
                .unwrap_or_default()
                .to_string(),
            user: ado_value(connection_string, &["User Id", "UID", "User"])
                .unwrap_or_default()
                .to_string(),
        };
        let connect_timeout = match custom_timeout {
            Some(timeout) => timeout,
            None => seconds(connection_string, &["Connect Timeout", "Connection Timeout"])?
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        };
        let command_timeout =
            seconds(connection_string, &["Command Timeout"])?.or(Some(DEFAULT_COMMAND_TIMEOUT));
        Ok(Self {
            config,
            server,
            connect_timeout,
            command_timeout,
            client: None,
        })
    }

    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    /// Override the per-command timeout; `None` waits indefinitely.
    pub fn set_command_timeout(&mut self, timeout: Option<Duration>) {
        self.command_timeout = timeout;
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub(super) async fn open(&mut self) -> Result<(), SqlResilienceError> {
        if self.client.is_some() {
            return Ok(());
        }
        let addr = self.config.get_addr();
        let config = self.config.clone();
        let connect = async {
            let tcp = TcpStream::connect(&addr).await.map_err(|e| {
                SqlResilienceError::ConnectionError(format!("TCP connection error: {e}"))
            })?;
            tcp.set_nodelay(true).map_err(|e| {
                SqlResilienceError::ConnectionError(format!("TCP configuration error: {e}"))
            })?;
            Ok::<_, SqlResilienceError>(Client::connect(config, tcp.compat_write()).await?)
        };
        // carries TIMEOUT_MARKER so the attempt is retried
        let client = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                SqlResilienceError::ConnectionError(format!(
                    "Timeout expired. Could not connect to {addr} within {}s",
                    self.connect_timeout.as_secs()
                ))
            })??;
        self.client = Some(client);
        Ok(())
    }

    pub(super) async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                tracing::warn!(server = %self.server.server_name, "error closing SQL Server connection: {e}");
            }
        }
    }

    pub(super) fn client(&mut self) -> Result<&mut MssqlClient, SqlResilienceError> {
        self.client
            .as_mut()
            .ok_or_else(|| SqlResilienceError::ConnectionError("connection is closed".to_string()))
    }

    pub(super) async fn run_batch(&mut self, sql: &str) -> Result<(), SqlResilienceError> {
        self.client()?.execute(sql, &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ado_settings_are_parsed() {
        let conn = MssqlConnection::from_ado_string(
            "Server=tcp:db01,1433;Database=app;User Id=svc;Password=x;Connect Timeout=5;Command Timeout=60;TrustServerCertificate=true",
            None,
        )
        .unwrap();
        assert_eq!(conn.server_info().database_name, "app");
        assert_eq!(conn.server_info().user, "svc");
        assert_eq!(conn.connect_timeout(), Duration::from_secs(5));
        assert_eq!(conn.command_timeout(), Some(Duration::from_secs(60)));
        assert!(!conn.is_open());
    }

    #[test]
    fn custom_timeout_overrides_connection_string() {
        let conn = MssqlConnection::from_ado_string(
            "Server=tcp:db01,1433;Database=app;Connect Timeout=5",
            Some(Duration::from_secs(42)),
        )
        .unwrap();
        assert_eq!(conn.connect_timeout(), Duration::from_secs(42));
        assert_eq!(conn.command_timeout(), Some(DEFAULT_COMMAND_TIMEOUT));
    }
}
