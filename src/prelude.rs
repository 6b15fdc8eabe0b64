//! Convenient imports for common functionality.

pub use crate::cache::{CompiledStatement, QueryIntent, StatementCache, StatementId};
pub use crate::config::{EngineConfig, EngineConfigBuilder};
pub use crate::driver::{Constraint, ConstraintKind, Driver};
pub use crate::engine::{SqlEngine, SqlEngineBuilder};
pub use crate::error::{DriverError, DriverErrorKind, RollbackValue, SqlEngineError};
pub use crate::executor::QueryStream;
pub use crate::mutation::{MutationOutcome, MutationRequest, OnConflict};
pub use crate::options::{QueryOptions, Timeout};
pub use crate::results::QueryResult;
pub use crate::telemetry::{CallKind, LogEntry, LogSink, TracingSink};
pub use crate::types::RowValues;

#[cfg(feature = "postgres")]
pub use crate::postgres::{PostgresDriver, PostgresOptions};
#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteDriver, SqliteOptions};
