//! Retry-and-escalation execution for SQL drivers.
//!
//! An [`Engine`] runs one logical database call on a caller-supplied or
//! engine-owned connection. Command timeouts are retried with linear backoff;
//! everything else, and an exhausted retry budget, is escalated according to
//! the configured [`ExceptionActionMode`].
//!
//! ```rust,no_run
//! use sql_resilience::prelude::*;
//!
//! # async fn run() -> Result<(), SqlResilienceError> {
//! let engine = Engine::with_tracing(PostgresAdapter::new(), EngineConfig::default());
//! let count: i64 = engine
//!     .execute_scalar_query(
//!         ConnectionTarget::connection_string("host=localhost dbname=app user=svc"),
//!         &Request::query("SELECT count(*) AS cnt FROM accounts"),
//!         "cnt",
//!     )
//!     .await?;
//! # let _ = count;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod binder;
pub mod command;
pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod logging;
pub mod prelude;
pub mod request;
pub mod results;
pub mod retry;
pub mod types;

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use adapter::{ServerInfo, VendorAdapter};
pub use binder::{ParameterBinder, Params};
pub use command::{Command, DbParameter, RETURN_PARAMETER_NAME};
pub use config::{EngineConfig, ExceptionActionMode};
pub use conversion::FromRowValue;
pub use engine::{ConnectionTarget, Engine};
pub use error::{EscalatedError, EscalationKind, SqlResilienceError};
pub use logging::{EventLog, FileLog, LogEntry, LogLevel, QueuedLog, TracingLog};
pub use request::{OutputTarget, Request};
pub use results::{CustomDbRow, ResultSet};
pub use retry::{RetryPolicy, TIMEOUT_MARKER};
pub use types::{CommandKind, DatabaseType, ParameterDirection, RowValues, SqlType, ValueKind};
