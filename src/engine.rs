use std::sync::Arc;
use std::time::Duration;

use bb8::Pool;

use crate::binding::{self, PoolId};
use crate::cache::{CompiledStatement, QueryIntent, StatementCache};
use crate::config::EngineConfig;
use crate::driver::Driver;
use crate::error::SqlEngineError;
use crate::executor::QueryStream;
use crate::options::QueryOptions;
use crate::results::QueryResult;
use crate::telemetry::{Emitter, LogSink, TracingSink};
use crate::types::RowValues;

/// bb8's own checkout deadline. Per-call `pool_timeout` is the effective bound.
pub(crate) const UNBOUNDED_CHECKOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Shared state behind every clone of a [`SqlEngine`].
pub(crate) struct EngineInner<D: Driver> {
    pub(crate) driver: Arc<D>,
    pub(crate) pool: Pool<D::Manager>,
    pub(crate) pool_id: PoolId,
    pub(crate) config: EngineConfig,
    pub(crate) emitter: Emitter,
    pub(crate) statements: Arc<StatementCache<D::Prepared>>,
}

/// SQL execution engine over one `bb8` pool and one driver.
///
/// Cloning is cheap; clones share the pool, the statement cache and the binding identity, so
/// a clone used inside [`SqlEngine::transaction`] resolves the transaction's connection.
pub struct SqlEngine<D: Driver> {
    pub(crate) inner: Arc<EngineInner<D>>,
}

impl<D: Driver> Clone for SqlEngine<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> std::fmt::Debug for SqlEngine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlEngine")
            .field("driver", &self.inner.driver.name())
            .field("pool_id", &self.inner.pool_id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SqlEngine`].
pub struct SqlEngineBuilder<D: Driver> {
    driver: D,
    manager: D::Manager,
    config: EngineConfig,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl<D: Driver> SqlEngineBuilder<D> {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a log sink. Without any, entries go to [`TracingSink`].
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Build the pool and the engine.
    ///
    /// # Errors
    /// Returns `SqlEngineError::Config` for an invalid configuration or
    /// `SqlEngineError::Pool` if the pool cannot open its initial connections.
    pub async fn build(self) -> Result<SqlEngine<D>, SqlEngineError> {
        self.config.validate()?;
        let pool = Pool::builder()
            .max_size(self.config.pool_size)
            .connection_timeout(UNBOUNDED_CHECKOUT)
            .retry_connection(false)
            .build(self.manager)
            .await
            .map_err(|e| SqlEngineError::Pool(format!("{} pool error: {e}", self.driver.name())))?;

        let sinks = if self.sinks.is_empty() {
            vec![Arc::new(TracingSink) as Arc<dyn LogSink>]
        } else {
            self.sinks
        };

        let pool_id = PoolId::next();
        tracing::debug!(
            driver = self.driver.name(),
            ?pool_id,
            pool_size = self.config.pool_size,
            "sql engine ready"
        );

        Ok(SqlEngine {
            inner: Arc::new(EngineInner {
                driver: Arc::new(self.driver),
                pool,
                pool_id,
                config: self.config,
                emitter: Emitter::new(sinks),
                statements: Arc::new(StatementCache::new()),
            }),
        })
    }
}

impl<D: Driver> SqlEngine<D> {
    #[must_use]
    pub fn builder(driver: D, manager: D::Manager) -> SqlEngineBuilder<D> {
        SqlEngineBuilder {
            driver,
            manager,
            config: EngineConfig::default(),
            sinks: Vec::new(),
        }
    }

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn pool_id(&self) -> PoolId {
        self.inner.pool_id
    }

    /// The engine's prepared statement cache.
    #[must_use]
    pub fn statements(&self) -> &Arc<StatementCache<D::Prepared>> {
        &self.inner.statements
    }

    /// Whether the current task is inside a transaction on this engine's pool.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        binding::is_bound(self.inner.pool_id)
    }

    /// Run `sql` without caching, on the transaction's connection when one is bound.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use sql_engine::prelude::*;
    /// use sql_engine::sqlite::{SqliteDriver, SqliteOptions};
    ///
    /// # async fn demo() -> Result<(), SqlEngineError> {
    /// let engine: SqlEngine<SqliteDriver> =
    ///     SqlEngine::new_sqlite(SqliteOptions::new("app.db".into())).await?;
    /// let res = engine
    ///     .query("SELECT ?1 + ?2", &[RowValues::Int(40), RowValues::Int(2)], &QueryOptions::new())
    ///     .await?;
    /// assert_eq!(res.rows(), &[vec![RowValues::Int(42)]]);
    /// # Ok(()) }
    /// ```
    ///
    /// # Errors
    /// Returns the driver, pool or timeout error of the call.
    pub async fn query(
        &self,
        sql: &str,
        params: &[RowValues],
        opts: &QueryOptions,
    ) -> Result<QueryResult, SqlEngineError> {
        self.execute(QueryIntent::no_cache(sql), params, opts).await
    }

    /// [`SqlEngine::query`] for callers that treat any failure as fatal.
    ///
    /// # Panics
    /// Panics with the error message when the query fails.
    pub async fn query_or_panic(
        &self,
        sql: &str,
        params: &[RowValues],
        opts: &QueryOptions,
    ) -> QueryResult {
        match self.query(sql, params, opts).await {
            Ok(result) => result,
            Err(err) => panic!("query failed: {err}\n\n    {sql}"),
        }
    }

    /// Dispatch one query intent.
    ///
    /// # Errors
    /// Returns the driver error, or `SqlEngineError::Reset` after invalidating a cached
    /// statement the driver no longer recognises.
    pub async fn execute(
        &self,
        intent: QueryIntent<D::Prepared>,
        params: &[RowValues],
        opts: &QueryOptions,
    ) -> Result<QueryResult, SqlEngineError> {
        let opts = opts.resolve(&self.inner.config);
        self.inner.execute(intent, params, &opts).await
    }

    /// Execute through the statement cache under `key`: prepare on first use, reuse the
    /// prepared handle afterwards. `compile` runs only when the key has never been seen.
    ///
    /// # Errors
    /// As [`SqlEngine::execute`]. After a `Reset` the next call re-prepares.
    pub async fn query_cached(
        &self,
        key: &str,
        compile: impl FnOnce() -> String,
        params: &[RowValues],
        opts: &QueryOptions,
    ) -> Result<QueryResult, SqlEngineError> {
        let intent = self.inner.statements.lookup(key, compile);
        self.execute(intent, params, opts).await
    }

    /// Prepare `statement` ahead of its first execution and memoize it.
    ///
    /// # Errors
    /// Returns the driver's prepare error.
    pub async fn prepare(
        &self,
        statement: &CompiledStatement,
        opts: &QueryOptions,
    ) -> Result<D::Prepared, SqlEngineError> {
        let opts = opts.resolve(&self.inner.config);
        self.inner.prepare(statement, &opts).await
    }

    /// Lazily stream the rows of `intent` in batches of `max_rows`. The stream must be
    /// consumed inside [`SqlEngine::transaction`] on the same task.
    #[must_use]
    pub fn stream(
        &self,
        intent: QueryIntent<D::Prepared>,
        params: Vec<RowValues>,
        opts: &QueryOptions,
    ) -> QueryStream<D> {
        let opts = opts.resolve(&self.inner.config);
        QueryStream::new(Arc::clone(&self.inner), intent, params, opts)
    }

    /// Run each DDL statement in order, outside any implicit transaction.
    ///
    /// # Errors
    /// Stops at and returns the first failing statement's error.
    pub async fn execute_ddl<I, S>(&self, statements: I, opts: &QueryOptions) -> Result<(), SqlEngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for statement in statements {
            self.query(statement.as_ref(), &[], opts).await?;
        }
        Ok(())
    }
}
