use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_postgres::config::Host;
use tokio_postgres::{Client, Config, NoTls};

use crate::adapter::ServerInfo;
use crate::error::SqlResilienceError;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A Postgres connection: parsed config plus the live client while open.
pub struct PostgresConnection {
    config: Config,
    server: ServerInfo,
    command_timeout: Option<Duration>,
    pub(super) client: Option<Client>,
    driver: Option<JoinHandle<()>>,
}

impl PostgresConnection {
    /// Parse a URL or key/value connection string without connecting.
    ///
    /// # Errors
    /// `PostgresError` when the string does not parse.
    pub fn from_connection_string(
        connection_string: &str,
        custom_timeout: Option<Duration>,
    ) -> Result<Self, SqlResilienceError> {
        let mut config: Config = connection_string.parse()?;
        if let Some(timeout) = custom_timeout {
            config.connect_timeout(timeout);
        }
        let server = ServerInfo {
            server_name: config
                .get_hosts()
                .iter()
                .map(|host| match host {
                    Host::Tcp(name) => name.clone(),
                    #[cfg(unix)]
                    Host::Unix(path) => path.display().to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            database_name: config.get_dbname().unwrap_or_default().to_string(),
            user: config.get_user().unwrap_or_default().to_string(),
        };
        Ok(Self {
            config,
            server,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            client: None,
            driver: None,
        })
    }

    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
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
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.config.get_connect_timeout().copied()
    }

    pub(super) async fn open(&mut self) -> Result<(), SqlResilienceError> {
        if self.is_open() {
            return Ok(());
        }
        let (client, connection) = self.config.connect(NoTls).await?;
        let server = self.server.server_name.clone();
        self.driver = Some(tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(server = %server, "postgres connection error: {e}");
            }
        }));
        self.client = Some(client);
        Ok(())
    }

    pub(super) fn close(&mut self) {
        // dropping the client ends the connection task
        self.client = None;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }

    pub(super) fn client(&self) -> Result<&Client, SqlResilienceError> {
        self.client
            .as_ref()
            .ok_or_else(|| SqlResilienceError::ConnectionError("connection is closed".to_string()))
    }
}
