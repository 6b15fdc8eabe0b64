// SQLite driver
//
// - manager: bb8 manager; each connection runs its rusqlite work on the blocking pool
// - params: RowValues -> rusqlite values
// - query: row decoding into QueryResult
// - driver: the Driver implementation (named statements, paged cursors, constraints)
// - config: SqliteOptions, its builder, and the engine constructor

pub mod config;
pub mod driver;
pub mod manager;
pub mod params;
pub mod query;

pub use config::{SqliteOptions, SqliteOptionsBuilder};
pub use driver::{SqliteCursor, SqliteDriver, SqlitePrepared};
pub use manager::{SqliteConnection, SqliteManager};
