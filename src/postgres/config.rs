use crate::config::EngineConfig;
use crate::engine::SqlEngine;
use crate::error::SqlEngineError;

use super::driver::PostgresDriver;
use super::manager::PgManager;

/// Connection settings plus engine configuration for a Postgres-backed engine.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub pg: tokio_postgres::Config,
    pub engine: EngineConfig,
}

impl PostgresOptions {
    #[must_use]
    pub fn new(pg: tokio_postgres::Config) -> Self {
        Self {
            pg,
            engine: EngineConfig::default(),
        }
    }

    /// Parse a `postgres://` URL or a key/value connection string.
    ///
    /// # Errors
    /// Returns `SqlEngineError::Config` when the string does not parse.
    pub fn from_url(url: &str) -> Result<Self, SqlEngineError> {
        let pg = url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| SqlEngineError::Config(format!("invalid postgres url: {e}")))?;
        Ok(Self::new(pg))
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    fn validate(&self) -> Result<(), SqlEngineError> {
        if self.pg.get_hosts().is_empty() {
            return Err(SqlEngineError::Config("host is required".to_string()));
        }
        if self.pg.get_user().is_none() {
            return Err(SqlEngineError::Config("user is required".to_string()));
        }
        Ok(())
    }
}

impl SqlEngine<PostgresDriver> {
    /// Build a Postgres engine and its pool.
    ///
    /// # Errors
    /// Returns `SqlEngineError::Config` if required settings are missing or
    /// `SqlEngineError::Pool` if the pool cannot connect.
    pub async fn new_postgres(options: PostgresOptions) -> Result<Self, SqlEngineError> {
        options.validate()?;
        SqlEngine::builder(PostgresDriver, PgManager::new(options.pg))
            .config(options.engine)
            .build()
            .await
    }
}
