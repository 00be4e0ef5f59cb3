//! Postgres adapter on top of tokio-postgres.
//!
//! Stored procedures map onto `CALL` (output parameters), `SELECT fn(...)`
//! (return values) and `SELECT * FROM fn(...)` (result sets).

mod adapter;
mod connection;
mod numeric;
mod params;
mod procedure;
mod query;

pub use adapter::PostgresAdapter;
pub use connection::PostgresConnection;
