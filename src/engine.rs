//! The execution engine: one retry/escalate skeleton behind every call shape.

mod procedure;
mod query;
mod skeleton;

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::VendorAdapter;
use crate::command::Command;
use crate::config::EngineConfig;
use crate::error::SqlResilienceError;
use crate::escalation::Escalator;
use crate::logging::{EventLog, TracingLog};
use crate::retry::RetryPolicy;
use crate::types::CommandKind;

/// Where a call gets its connection from.
pub enum ConnectionTarget<'a, C> {
    /// A caller-owned connection. If it is already open the engine leaves it
    /// open; if it is closed the engine opens it and closes it again.
    Connection(&'a mut C),
    /// Build a connection through the adapter for this call only.
    ConnectionString {
        connection_string: &'a str,
        custom_timeout: Option<Duration>,
    },
}

impl<'a, C> ConnectionTarget<'a, C> {
    #[must_use]
    pub fn connection_string(connection_string: &'a str) -> Self {
        Self::ConnectionString {
            connection_string,
            custom_timeout: None,
        }
    }

    /// Connection string with a connect-timeout override.
    #[must_use]
    pub fn connection_string_with_timeout(connection_string: &'a str, timeout: Duration) -> Self {
        Self::ConnectionString {
            connection_string,
            custom_timeout: Some(timeout),
        }
    }
}

impl<'a, C> From<&'a mut C> for ConnectionTarget<'a, C> {
    fn from(conn: &'a mut C) -> Self {
        Self::Connection(conn)
    }
}

/// Runs commands through a [`VendorAdapter`] with timeout retries and the
/// configured escalation policy.
///
/// The engine itself holds no connection; every call owns its retry state, so
/// one engine can serve any number of concurrent calls.
pub struct Engine<A: VendorAdapter> {
    adapter: A,
    config: EngineConfig,
    policy: RetryPolicy,
    escalator: Escalator,
    log: Arc<dyn EventLog>,
}

impl<A: VendorAdapter> Engine<A> {
    pub fn new(adapter: A, config: EngineConfig, log: Arc<dyn EventLog>) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config),
            escalator: Escalator::new(config.exception_action_mode(), log.clone()),
            adapter,
            config,
            log,
        }
    }

    /// Engine that reports through `tracing` only.
    pub fn with_tracing(adapter: A, config: EngineConfig) -> Self {
        Self::new(adapter, config, Arc::new(TracingLog))
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build a closed connection through the adapter.
    ///
    /// # Errors
    /// Whatever the adapter reports; connection creation is never retried.
    pub async fn create_connection(
        &self,
        connection_string: &str,
        custom_timeout: Option<Duration>,
    ) -> Result<A::Connection, SqlResilienceError> {
        self.adapter
            .create_connection(connection_string, custom_timeout)
            .await
    }

    /// Replace `command`'s parameters with the procedure signature from the
    /// server. Returns `false` without a round trip unless the connection is
    /// open, the command is a stored procedure and its text is not empty.
    ///
    /// # Errors
    /// Driver errors from the signature query.
    pub async fn derive_parameters(
        &self,
        conn: &mut A::Connection,
        command: &mut Command,
    ) -> Result<bool, SqlResilienceError> {
        if !self.adapter.is_open(conn)
            || command.kind != CommandKind::StoredProcedure
            || command.text.trim().is_empty()
        {
            return Ok(false);
        }
        self.adapter.derive_parameters(conn, command).await
    }
}
