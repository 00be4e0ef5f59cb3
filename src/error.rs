use std::fmt;

use chrono::{DateTime, Local};
use thiserror::Error;

/// Rendering used for every timestamp that ends up in a log line or an escalated error.
pub const DISPLAY_DATETIME_FORMAT: &str = "%m/%d/%Y %I:%M:%S%.3f %p";

#[derive(Debug, Error)]
pub enum SqlResilienceError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    /// Raised by adapters when the command timeout elapses. The message keeps the
    /// driver wording so the retry classifier treats it like a driver timeout.
    #[error("Timeout expired. {0}")]
    CommandTimeout(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid command shape: {0}")]
    InvalidCommandShape(String),

    #[error(
        "Invalid datatype detected in generic type conversion. Source type {source_type}, requested type {target_type}"
    )]
    InvalidConversion {
        source_type: &'static str,
        target_type: &'static str,
    },

    #[error(transparent)]
    Escalated(Box<EscalatedError>),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlResilienceError {
    /// Caller-contract violations: never retried and never routed through the
    /// exception action mode.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter(_) | Self::InvalidCommandShape(_) | Self::InvalidConversion { .. }
        )
    }

    /// The composite error, when this is one.
    #[must_use]
    pub fn as_escalated(&self) -> Option<&EscalatedError> {
        if let Self::Escalated(inner) = self {
            Some(inner)
        } else {
            None
        }
    }
}

impl From<EscalatedError> for SqlResilienceError {
    fn from(err: EscalatedError) -> Self {
        SqlResilienceError::Escalated(Box::new(err))
    }
}

/// Why a failing call stopped being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationKind {
    /// Every attempt timed out.
    RetryBudgetExhausted { attempts: u32 },
    /// Any failure that is not a driver timeout.
    UnexpectedExecution,
}

/// The composite error handed to the exception action mode once a call gives up.
///
/// Carries the timestamps of the last attempt, the rendered parameter dump, the
/// optional caller diagnostic and the original error as its `source()`.
#[derive(Debug)]
pub struct EscalatedError {
    kind: EscalationKind,
    started_at: DateTime<Local>,
    ended_at: DateTime<Local>,
    parameters: String,
    additional_info: Option<String>,
    source: SqlResilienceError,
}

impl EscalatedError {
    #[must_use]
    pub fn new(
        kind: EscalationKind,
        started_at: DateTime<Local>,
        ended_at: DateTime<Local>,
        parameters: String,
        additional_info: Option<String>,
        source: SqlResilienceError,
    ) -> Self {
        Self {
            kind,
            started_at,
            ended_at,
            parameters,
            additional_info,
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EscalationKind {
        self.kind
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> DateTime<Local> {
        self.ended_at
    }

    /// Rendered bound parameters and server identity of the failing command.
    #[must_use]
    pub fn parameters(&self) -> &str {
        &self.parameters
    }

    /// Text returned by the caller's `on_exception` callback, if one was supplied.
    #[must_use]
    pub fn additional_info(&self) -> Option<&str> {
        self.additional_info.as_deref()
    }

    /// The error raised by the last attempt.
    #[must_use]
    pub fn original(&self) -> &SqlResilienceError {
        &self.source
    }
}

impl fmt::Display for EscalatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let started = self.started_at.format(DISPLAY_DATETIME_FORMAT);
        let ended = self.ended_at.format(DISPLAY_DATETIME_FORMAT);
        match self.kind {
            EscalationKind::RetryBudgetExhausted { attempts } => write!(
                f,
                "Exception occurred. Maximum attempts ({attempts}) completed. If this occurs frequently then extend the connect timeout of the connection. Start time: {started}, end time: {ended}. Execution Parameters: {}",
                self.parameters
            )?,
            EscalationKind::UnexpectedExecution => write!(
                f,
                "Unexpected exception occurred during database query. Start time: {started}, end time: {ended}. Execution Parameters: {}",
                self.parameters
            )?,
        }
        if let Some(info) = &self.additional_info {
            write!(f, ". Additional Debuginfo: {info}")?;
        }
        write!(f, ". Cause: {}", self.source)
    }
}

impl std::error::Error for EscalatedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
