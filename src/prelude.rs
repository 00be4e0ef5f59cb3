//! Convenient imports for common functionality.
//!
//! This module re-exports the types needed to build requests, run them through
//! an engine and read the results.

pub use crate::adapter::VendorAdapter;
pub use crate::binder::Params;
pub use crate::command::{Command, DbParameter};
pub use crate::config::{EngineConfig, ExceptionActionMode};
pub use crate::conversion::FromRowValue;
pub use crate::engine::{ConnectionTarget, Engine};
pub use crate::error::{EscalatedError, EscalationKind, SqlResilienceError};
pub use crate::logging::{EventLog, FileLog, QueuedLog, TracingLog};
pub use crate::request::{OutputTarget, Request};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::types::{CommandKind, DatabaseType, ParameterDirection, RowValues, SqlType};

#[cfg(feature = "mssql")]
pub use crate::mssql::{MssqlAdapter, MssqlConnection};
#[cfg(feature = "postgres")]
pub use crate::postgres::{PostgresAdapter, PostgresConnection};
