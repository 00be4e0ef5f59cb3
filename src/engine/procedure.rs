use super::skeleton::{ExecuteMode, Executed};
use super::{ConnectionTarget, Engine};
use crate::adapter::VendorAdapter;
use crate::command::Command;
use crate::conversion::{FromRowValue, scalar_from_parameter};
use crate::error::SqlResilienceError;
use crate::request::{OutputTarget, Request};
use crate::results::ResultSet;
use crate::types::CommandKind;

impl<A: VendorAdapter> Engine<A> {
    /// Call a stored procedure and return the affected row count.
    ///
    /// With `simple_transaction(true)` the call runs inside a transaction that
    /// is committed only when execution succeeds.
    ///
    /// # Errors
    /// `InvalidCommandShape` for text requests, other contract violations, and
    /// the escalated error unless the mode is `Log`.
    pub async fn execute_basic_stored_procedure(
        &self,
        target: ConnectionTarget<'_, A::Connection>,
        request: &Request,
    ) -> Result<u64, SqlResilienceError> {
        const OPERATION: &str = "ExecuteBasicStoredProcedure";
        Self::require_kind(request, CommandKind::StoredProcedure, OPERATION)?;
        self.run(
            OPERATION,
            target,
            request,
            ExecuteMode::NonQuery,
            |_, executed, _| match executed {
                Executed::RowCount(count) => Ok(count),
                Executed::Rows(rows) => Ok(rows.rows_affected as u64),
            },
        )
        .await
    }

    /// Call a stored procedure and read one output parameter or the return value.
    ///
    /// The slot named by `output` is declared on the request if the caller did
    /// not declare it.
    ///
    /// # Errors
    /// `InvalidCommandShape` for text requests, other contract violations, and
    /// the escalated error unless the mode is `Log`.
    pub async fn execute_scalar_stored_procedure<T>(
        &self,
        target: ConnectionTarget<'_, A::Connection>,
        request: &Request,
        output: OutputTarget,
    ) -> Result<T, SqlResilienceError>
    where
        T: FromRowValue + Send,
    {
        const OPERATION: &str = "ExecuteScalarStoredProcedure";
        Self::require_kind(request, CommandKind::StoredProcedure, OPERATION)?;
        let request = request.clone().declare_output(&output);
        let name = output.parameter_name();
        self.run(
            OPERATION,
            target,
            &request,
            ExecuteMode::NonQuery,
            |adapter, _, command| scalar_from_parameter(adapter, command, name),
        )
        .await
    }

    /// Call a stored procedure and hand its first result set, plus the executed
    /// command for reading output values, to `transform`.
    ///
    /// # Errors
    /// `InvalidCommandShape` for text requests, other contract violations, and
    /// the escalated error unless the mode is `Log`.
    pub async fn execute_complex_stored_procedure<T, F>(
        &self,
        target: ConnectionTarget<'_, A::Connection>,
        request: &Request,
        mut transform: F,
    ) -> Result<T, SqlResilienceError>
    where
        T: Default + Send,
        F: FnMut(&ResultSet, &Command) -> Result<T, SqlResilienceError> + Send,
    {
        const OPERATION: &str = "ExecuteComplexStoredProcedure";
        Self::require_kind(request, CommandKind::StoredProcedure, OPERATION)?;
        self.run(
            OPERATION,
            target,
            request,
            ExecuteMode::Reader,
            |_, executed, command| match executed {
                Executed::Rows(rows) => transform(rows, command),
                Executed::RowCount(_) => transform(&ResultSet::default(), command),
            },
        )
        .await
    }
}
