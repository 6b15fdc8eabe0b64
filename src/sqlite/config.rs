use crate::config::EngineConfig;
use crate::engine::SqlEngine;
use crate::error::SqlEngineError;

use super::driver::SqliteDriver;
use super::manager::SqliteManager;

/// Options for configuring a `SQLite` engine.
///
/// Every pooled connection opens `db_path` separately, so `":memory:"` gives each connection its
/// own empty database; use a file for anything shared.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    pub engine: EngineConfig,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            engine: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.opts.engine.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.opts.engine = engine;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build the engine.
    ///
    /// # Errors
    /// Returns `SqlEngineError` if pool creation or the initial smoke test fails.
    pub async fn build(self) -> Result<SqlEngine<SqliteDriver>, SqlEngineError> {
        SqlEngine::new_sqlite(self.finish()).await
    }
}

impl SqlEngine<SqliteDriver> {
    #[must_use]
    pub fn sqlite_builder(db_path: String) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    /// Build a `SQLite` engine and run a smoke query on one connection.
    ///
    /// # Errors
    /// Returns `SqlEngineError::Config` for an invalid configuration or `SqlEngineError::Pool`
    /// if the database cannot be opened.
    pub async fn new_sqlite(opts: SqliteOptions) -> Result<Self, SqlEngineError> {
        let engine = SqlEngine::builder(SqliteDriver, SqliteManager::new(opts.db_path))
            .config(opts.engine)
            .build()
            .await?;
        let smoke = crate::options::QueryOptions::new().log(false);
        engine.query("SELECT 1", &[], &smoke).await?;
        Ok(engine)
    }
}
