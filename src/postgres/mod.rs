// PostgreSQL driver
//
// - manager: bb8 connection manager and the per-connection prepared statement map
// - params: RowValues -> ToSql
// - query: row decoding into QueryResult
// - driver: the Driver implementation (prepare/execute, cursors, transactions, constraints)
// - config: PostgresOptions and the engine constructor

pub mod config;
pub mod driver;
pub mod manager;
pub mod params;
pub mod query;

pub use config::PostgresOptions;
pub use driver::{PgCursor, PgPrepared, PostgresDriver};
pub use manager::{PgConnection, PgManager};
