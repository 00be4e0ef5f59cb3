use std::sync::Arc;

use crate::config::ExceptionActionMode;
use crate::error::{EscalatedError, SqlResilienceError};
use crate::logging::EventLog;

/// Applies the configured [`ExceptionActionMode`] to a call that gave up.
#[derive(Clone)]
pub struct Escalator {
    mode: ExceptionActionMode,
    log: Arc<dyn EventLog>,
}

impl Escalator {
    #[must_use]
    pub fn new(mode: ExceptionActionMode, log: Arc<dyn EventLog>) -> Self {
        Self { mode, log }
    }

    #[must_use]
    pub fn mode(&self) -> ExceptionActionMode {
        self.mode
    }

    /// Log and/or return the composite error. Under `Log` the call resolves to
    /// `T::default()`.
    ///
    /// # Errors
    /// The composite error, wrapped in [`SqlResilienceError::Escalated`], unless
    /// the mode is `Log`.
    pub fn escalate<T: Default>(
        &self,
        err: EscalatedError,
        operation: &str,
    ) -> Result<T, SqlResilienceError> {
        if self.mode.logs() {
            self.log.log_exception(&err, operation, &[]);
        }
        if self.mode.rethrows() {
            Err(err.into())
        } else {
            tracing::debug!(operation, "failure suppressed by Log action mode");
            Ok(T::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EscalationKind;
    use crate::test_utils::MemoryLog;
    use chrono::Local;

    fn failure() -> EscalatedError {
        let now = Local::now();
        EscalatedError::new(
            EscalationKind::UnexpectedExecution,
            now,
            now,
            "Parameters: ".to_string(),
            None,
            SqlResilienceError::ExecutionError("boom".into()),
        )
    }

    #[test]
    fn each_mode_logs_and_returns_as_configured() {
        for (mode, expect_log, expect_err) in [
            (ExceptionActionMode::Log, 1, false),
            (ExceptionActionMode::Rethrow, 0, true),
            (ExceptionActionMode::LogAndRethrow, 1, true),
        ] {
            let log = Arc::new(MemoryLog::new());
            let escalator = Escalator::new(mode, log.clone());
            let result = escalator.escalate::<i64>(failure(), "ExecuteScalarQuery");
            assert_eq!(log.len(), expect_log, "{mode:?}");
            assert_eq!(result.is_err(), expect_err, "{mode:?}");
            if !expect_err {
                assert_eq!(result.unwrap(), 0);
            }
        }
    }

    #[test]
    fn logged_entry_carries_operation_header() {
        let log = Arc::new(MemoryLog::new());
        let escalator = Escalator::new(ExceptionActionMode::LogAndRethrow, log.clone());
        let _ = escalator.escalate::<()>(failure(), "ExecuteBasicQuery");
        let entries = log.entries();
        assert_eq!(entries[0].header, "ExecuteBasicQuery");
        assert!(entries[0].text.starts_with("Unexpected exception occurred"));
        assert_eq!(entries[0].causes, vec!["SQL execution error: boom".to_string()]);
    }
}
