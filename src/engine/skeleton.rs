use chrono::{DateTime, Local};

use super::{ConnectionTarget, Engine};
use crate::adapter::VendorAdapter;
use crate::binder::ParameterBinder;
use crate::command::Command;
use crate::error::{DISPLAY_DATETIME_FORMAT, EscalatedError, EscalationKind, SqlResilienceError};
use crate::request::Request;
use crate::results::ResultSet;
use crate::retry::{RetryDecision, RetryState};
use crate::types::CommandKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ExecuteMode {
    NonQuery,
    Reader,
}

/// What one successful execution produced, handed to the extraction step.
pub(super) enum Executed<'r> {
    RowCount(u64),
    Rows(&'r ResultSet),
}

/// Per-attempt resources the cleanup and escalation steps need to see.
struct AttemptScope {
    command: Command,
    reader: Option<ResultSet>,
    in_transaction: bool,
}

impl<A: VendorAdapter> Engine<A> {
    pub(super) fn require_kind(
        request: &Request,
        expected: CommandKind,
        operation: &str,
    ) -> Result<(), SqlResilienceError> {
        if request.kind() != expected {
            return Err(SqlResilienceError::InvalidCommandShape(format!(
                "{operation} expects a {expected:?} command, got {:?} ({})",
                request.kind(),
                request.text()
            )));
        }
        if request.return_param().is_some() && request.kind() != CommandKind::StoredProcedure {
            return Err(SqlResilienceError::InvalidCommandShape(format!(
                "{operation}: return parameter requested on a {:?} command",
                request.kind()
            )));
        }
        Ok(())
    }

    /// Resolve the target, then run the retry loop on it.
    pub(super) async fn run<T, F>(
        &self,
        operation: &'static str,
        target: ConnectionTarget<'_, A::Connection>,
        request: &Request,
        mode: ExecuteMode,
        mut extract: F,
    ) -> Result<T, SqlResilienceError>
    where
        T: Default + Send,
        F: FnMut(&A, Executed<'_>, &Command) -> Result<T, SqlResilienceError> + Send,
    {
        match target {
            ConnectionTarget::Connection(conn) => {
                self.run_on(operation, conn, request, mode, &mut extract)
                    .await
            }
            ConnectionTarget::ConnectionString {
                connection_string,
                custom_timeout,
            } => {
                let mut conn = self
                    .adapter
                    .create_connection(connection_string, custom_timeout)
                    .await?;
                self.run_on(operation, &mut conn, request, mode, &mut extract)
                    .await
            }
        }
    }

    async fn run_on<T, F>(
        &self,
        operation: &'static str,
        conn: &mut A::Connection,
        request: &Request,
        mode: ExecuteMode,
        extract: &mut F,
    ) -> Result<T, SqlResilienceError>
    where
        T: Default + Send,
        F: FnMut(&A, Executed<'_>, &Command) -> Result<T, SqlResilienceError> + Send,
    {
        let caller_opened = self.adapter.is_open(conn);
        let mut state = RetryState::new();

        loop {
            let attempt = state.begin_attempt();
            let mut scope = AttemptScope {
                command: request.command(self.adapter.command_timeout(conn)),
                reader: None,
                in_transaction: false,
            };

            let result = self
                .attempt(operation, attempt, conn, request, mode, &mut scope, extract)
                .await;

            if !caller_opened {
                self.adapter.close(conn).await;
            } else if scope.in_transaction {
                // the caller keeps the connection, so the abandoned transaction must not linger on it
                self.adapter.discard_transaction(conn).await;
            }

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_contract_violation() => return Err(err),
                Err(err) => err,
            };
            let ended_at = Local::now();

            let kind = match self
                .policy
                .decide(&state, self.adapter.is_command_timeout(&err))
            {
                RetryDecision::Retry {
                    delay,
                    next_attempt,
                } => {
                    let message = format!(
                        "Timeout exception occurred. Last call start time: {}, end time: {}. Start Retry({next_attempt}).",
                        state.started_at().format(DISPLAY_DATETIME_FORMAT),
                        ended_at.format(DISPLAY_DATETIME_FORMAT),
                    );
                    self.log.log_message(&message, operation, &[]);
                    tracing::info!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "command timed out, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                RetryDecision::BudgetExhausted { attempts } => {
                    EscalationKind::RetryBudgetExhausted { attempts }
                }
                RetryDecision::Unexpected => EscalationKind::UnexpectedExecution,
            };

            return self.escalate(
                operation,
                kind,
                state.started_at(),
                ended_at,
                conn,
                &scope,
                request,
                err,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt<T, F>(
        &self,
        operation: &'static str,
        attempt: u32,
        conn: &mut A::Connection,
        request: &Request,
        mode: ExecuteMode,
        scope: &mut AttemptScope,
        extract: &mut F,
    ) -> Result<T, SqlResilienceError>
    where
        T: Default + Send,
        F: FnMut(&A, Executed<'_>, &Command) -> Result<T, SqlResilienceError> + Send,
    {
        if request.wants_derived_parameters() {
            self.ensure_open(conn).await?;
            if !self.derive_parameters(conn, &mut scope.command).await? {
                tracing::debug!(operation, procedure = %request.text(), "no parameters derived");
            }
        }

        ParameterBinder::new(&self.adapter, self.log.as_ref()).bind(&mut scope.command, request)?;
        tracing::debug!(
            operation,
            attempt,
            parameters = %self.adapter.describe_bound_parameters(conn, &scope.command),
            "executing command"
        );

        self.ensure_open(conn).await?;
        if request.wants_transaction() {
            self.adapter.begin_transaction(conn).await?;
            scope.in_transaction = true;
        }

        let value = match mode {
            ExecuteMode::NonQuery => {
                let count = self
                    .adapter
                    .execute_non_query(conn, &mut scope.command)
                    .await?;
                extract(&self.adapter, Executed::RowCount(count), &scope.command)?
            }
            ExecuteMode::Reader => {
                let rows = self
                    .adapter
                    .execute_reader(conn, &mut scope.command)
                    .await?;
                let rows = scope.reader.insert(rows);
                extract(&self.adapter, Executed::Rows(&*rows), &scope.command)?
            }
        };

        if scope.in_transaction {
            self.adapter.commit(conn).await?;
            scope.in_transaction = false;
        }
        Ok(value)
    }

    async fn ensure_open(&self, conn: &mut A::Connection) -> Result<(), SqlResilienceError> {
        if self.adapter.is_open(conn) {
            Ok(())
        } else {
            self.adapter.open(conn).await
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn escalate<T: Default>(
        &self,
        operation: &'static str,
        kind: EscalationKind,
        started_at: DateTime<Local>,
        ended_at: DateTime<Local>,
        conn: &A::Connection,
        scope: &AttemptScope,
        request: &Request,
        err: SqlResilienceError,
    ) -> Result<T, SqlResilienceError> {
        let additional_info = request
            .exception_callback()
            .map(|callback| callback(&scope.command, scope.reader.as_ref(), &err));
        let parameters = self
            .adapter
            .describe_bound_parameters(conn, &scope.command);
        let escalated =
            EscalatedError::new(kind, started_at, ended_at, parameters, additional_info, err);
        self.escalator.escalate(escalated, operation)
    }
}
