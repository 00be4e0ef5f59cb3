use super::skeleton::{ExecuteMode, Executed};
use super::{ConnectionTarget, Engine};
use crate::adapter::VendorAdapter;
use crate::conversion::{FromRowValue, scalar_from_result_set};
use crate::error::SqlResilienceError;
use crate::request::Request;
use crate::results::ResultSet;
use crate::types::CommandKind;

impl<A: VendorAdapter> Engine<A> {
    /// Run a text query and coerce `column` of the first row.
    ///
    /// No rows yields `T::default()`, as does any escalated failure under the
    /// `Log` action mode.
    ///
    /// # Errors
    /// Contract violations, and the escalated error unless the mode is `Log`.
    pub async fn execute_scalar_query<T>(
        &self,
        target: ConnectionTarget<'_, A::Connection>,
        request: &Request,
        column: &str,
    ) -> Result<T, SqlResilienceError>
    where
        T: FromRowValue + Send,
    {
        const OPERATION: &str = "ExecuteScalarQuery";
        Self::require_kind(request, CommandKind::Text, OPERATION)?;
        self.run(
            OPERATION,
            target,
            request,
            ExecuteMode::Reader,
            |adapter, executed, _command| match executed {
                Executed::Rows(rows) => scalar_from_result_set(adapter, rows, column),
                Executed::RowCount(_) => Ok(T::default()),
            },
        )
        .await
    }

    /// Run a text command and return the affected row count.
    ///
    /// # Errors
    /// Contract violations, and the escalated error unless the mode is `Log`
    /// (which yields 0).
    pub async fn execute_basic_query(
        &self,
        target: ConnectionTarget<'_, A::Connection>,
        request: &Request,
    ) -> Result<u64, SqlResilienceError> {
        const OPERATION: &str = "ExecuteBasicQuery";
        Self::require_kind(request, CommandKind::Text, OPERATION)?;
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

    /// Run a text query and hand the fully read result set to `transform`.
    ///
    /// `transform` runs once per successful attempt; an error it returns is
    /// escalated like any other execution failure.
    ///
    /// # Errors
    /// Contract violations, and the escalated error unless the mode is `Log`.
    pub async fn execute_complex_query<T, F>(
        &self,
        target: ConnectionTarget<'_, A::Connection>,
        request: &Request,
        mut transform: F,
    ) -> Result<T, SqlResilienceError>
    where
        T: Default + Send,
        F: FnMut(&ResultSet) -> Result<T, SqlResilienceError> + Send,
    {
        const OPERATION: &str = "ExecuteComplexQuery";
        Self::require_kind(request, CommandKind::Text, OPERATION)?;
        self.run(
            OPERATION,
            target,
            request,
            ExecuteMode::Reader,
            |_, executed, _| match executed {
                Executed::Rows(rows) => transform(rows),
                Executed::RowCount(_) => transform(&ResultSet::default()),
            },
        )
        .await
    }
}
