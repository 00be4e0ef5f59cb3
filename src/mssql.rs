//! SQL Server adapter on top of tiberius.
//!
//! - `connection`: ADO connection strings, open/close, transactions
//! - `params`: binding `RowValues` and mapping `SqlType` to T-SQL
//! - `query`: result extraction
//! - `procedure`: the T-SQL batch that emulates stored-procedure calls
//! - `adapter`: the `VendorAdapter` implementation

mod adapter;
mod connection;
mod params;
mod procedure;
mod query;

pub use adapter::MssqlAdapter;
pub use connection::{MssqlClient, MssqlConnection};
