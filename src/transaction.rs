//! Transactions pinned to one pooled connection through the task's binding.

use std::any::Any;
use std::future::Future;
use std::time::Instant;

use crate::binding::{self, BindingGuard};
use crate::driver::Driver;
use crate::engine::SqlEngine;
use crate::error::{RollbackValue, SqlEngineError};
use crate::executor::Call;
use crate::options::{CallOptions, QueryOptions, Timeout};

impl<D: Driver> SqlEngine<D> {
    /// Run `f` inside a transaction.
    ///
    /// The outermost call checks out a connection, binds it to this task for the duration of
    /// `f`, and commits when `f` returns `Ok` or rolls back when it returns `Err`. A nested call
    /// in the same task reuses the bound connection without a second checkout or `BEGIN`; if the
    /// nested `f` fails, the outer transaction can only roll back.
    ///
    /// ```rust,no_run
    /// use sql_engine::prelude::*;
    /// use sql_engine::sqlite::{SqliteDriver, SqliteOptions};
    ///
    /// # async fn demo(engine: SqlEngine<SqliteDriver>) -> Result<(), SqlEngineError> {
    /// let opts = QueryOptions::new();
    /// engine
    ///     .transaction(&opts, || async {
    ///         engine.query("INSERT INTO audit (msg) VALUES (?1)", &["hello".into()], &opts).await?;
    ///         engine.query("UPDATE counters SET n = n + 1", &[], &opts).await
    ///     })
    ///     .await?;
    /// # Ok(()) }
    /// ```
    ///
    /// # Errors
    /// The error `f` returned (after rolling back), `SqlEngineError::Rollback` carrying the value
    /// passed to [`SqlEngine::rollback`], `SqlEngineError::RollbackOnly` when a nested transaction
    /// failed but `f` still returned `Ok`, or the checkout/`BEGIN`/`COMMIT` error.
    pub async fn transaction<T, F, Fut>(&self, opts: &QueryOptions, f: F) -> Result<T, SqlEngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SqlEngineError>>,
    {
        if let Some(bound) = binding::lookup::<D>(self.inner.pool_id) {
            let result = f().await;
            if result.is_err() {
                bound.mark_rollback_only();
            }
            return result;
        }
        let opts = opts.resolve(&self.inner.config);
        binding::scope(self.run_transaction(opts, f)).await
    }

    async fn run_transaction<T, F, Fut>(&self, opts: CallOptions, f: F) -> Result<T, SqlEngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SqlEngineError>>,
    {
        let inner = &self.inner;
        let started = Instant::now();
        let conn = inner.checkout(opts.pool_timeout).await?;
        let queue_time = started.elapsed();
        let guard = binding::bind(inner.pool_id, std::sync::Arc::clone(&inner.driver), conn)?;

        if let Err(err) = inner
            .dispatch_bound(guard.bound(), Call::Begin, &opts, Some(queue_time))
            .await
        {
            guard.release().await;
            return Err(err);
        }

        let outcome = match f().await {
            Ok(value) if !guard.bound().is_rollback_only() => {
                match inner.dispatch_bound(guard.bound(), Call::Commit, &opts, None).await {
                    Ok(_) => Ok(value),
                    Err(err) => {
                        self.roll_back(&guard, &opts).await;
                        Err(err)
                    }
                }
            }
            Ok(_) => {
                self.roll_back(&guard, &opts).await;
                Err(SqlEngineError::RollbackOnly)
            }
            Err(err) => {
                self.roll_back(&guard, &opts).await;
                Err(err)
            }
        };
        guard.release().await;
        outcome
    }

    async fn roll_back(&self, guard: &BindingGuard<D>, opts: &CallOptions) {
        if let Err(err) = self
            .inner
            .dispatch_bound(guard.bound(), Call::Rollback, opts, None)
            .await
        {
            tracing::warn!(target: "sql_engine::transaction", %err, "rollback failed");
        }
    }

    /// Abort the current transaction, carrying `value` out of it. Return the error from the
    /// transaction closure; the transaction rolls back even if the error is swallowed.
    ///
    /// ```rust,no_run
    /// # use sql_engine::prelude::*;
    /// # use sql_engine::sqlite::SqliteDriver;
    /// # async fn demo(engine: SqlEngine<SqliteDriver>) {
    /// let res: Result<(), _> = engine
    ///     .transaction(&QueryOptions::new(), || async { Err(engine.rollback("not today")) })
    ///     .await;
    /// if let Err(SqlEngineError::Rollback(value)) = res {
    ///     assert_eq!(value.downcast_ref::<&str>(), Some(&"not today"));
    /// }
    /// # }
    /// ```
    ///
    /// Outside a transaction this returns `SqlEngineError::NotInTransaction`.
    #[must_use]
    pub fn rollback<V: Any + Send + Sync>(&self, value: V) -> SqlEngineError {
        match binding::lookup::<D>(self.inner.pool_id) {
            Some(bound) => {
                bound.mark_rollback_only();
                SqlEngineError::Rollback(RollbackValue::new(value))
            }
            None => SqlEngineError::NotInTransaction("rollback"),
        }
    }

    /// Run `f` with `sql` extended by the row-lock clause, inside a transaction that holds the
    /// lock until `f` returns. The lock clause is, in order: `opts.migration_lock`, the engine
    /// config's, the driver default. An empty clause runs `sql` unchanged.
    ///
    /// # Errors
    /// `SqlEngineError::Config` when the pool has a single connection (the migration itself
    /// would starve waiting for a second one), before any checkout. Otherwise as
    /// [`SqlEngine::transaction`].
    pub async fn lock_for_migrations<T, F, Fut>(
        &self,
        sql: &str,
        opts: &QueryOptions,
        f: F,
    ) -> Result<T, SqlEngineError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, SqlEngineError>>,
    {
        let config = &self.inner.config;
        if config.pool_size == 1 {
            return Err(SqlEngineError::Config(
                "migration locking needs a pool_size of at least 2: the lock holds one \
                 connection while migrations run on another"
                    .to_string(),
            ));
        }

        let clause = opts
            .migration_lock
            .clone()
            .or_else(|| config.migration_lock.clone())
            .or_else(|| self.inner.driver.default_migration_lock().map(str::to_string));
        let locked_sql = match clause.as_deref().map(str::trim) {
            Some(clause) if !clause.is_empty() => format!("{sql} {clause}"),
            _ => sql.to_string(),
        };

        let tx_opts = opts.clone().log(false).timeout(Timeout::Infinity);
        self.transaction(&tx_opts, || f(locked_sql)).await
    }
}
