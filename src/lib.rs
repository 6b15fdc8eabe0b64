//! Database-agnostic SQL execution engine.
//!
//! [`SqlEngine`] runs statements over a `bb8` pool through a [`Driver`]. It keeps a prepared
//! statement cache keyed by query-layer keys, pins transactions to a single connection through a
//! task-local binding, streams large results through cursors, and reads single-row mutation
//! outcomes as applied, stale, or constraint-invalid.

pub mod binding;
pub mod cache;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod executor;
pub mod mutation;
pub mod options;
pub mod prelude;
pub mod results;
pub mod telemetry;
pub mod transaction;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cache::{CompiledStatement, QueryIntent, StatementCache, StatementId};
pub use config::EngineConfig;
pub use driver::{Constraint, ConstraintKind, Driver, Statement};
pub use engine::{SqlEngine, SqlEngineBuilder};
pub use error::{DriverError, DriverErrorKind, RollbackValue, SqlEngineError};
pub use executor::QueryStream;
pub use mutation::{MutationOutcome, MutationRequest, OnConflict};
pub use options::{QueryOptions, Timeout};
pub use results::QueryResult;
pub use types::RowValues;
