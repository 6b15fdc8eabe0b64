use std::future::Future;
use std::time::Duration;

use crate::config::EngineConfig;

/// Upper bound on a suspension point (pool checkout or driver round-trip).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    After(Duration),
    Infinity,
}

impl Timeout {
    #[must_use]
    pub fn millis(ms: u64) -> Self {
        Timeout::After(Duration::from_millis(ms))
    }

    /// Await `fut` within this bound; `Err` carries the elapsed bound.
    pub(crate) async fn run<F: Future>(self, fut: F) -> Result<F::Output, Duration> {
        match self {
            Timeout::Infinity => Ok(fut.await),
            Timeout::After(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| limit),
        }
    }
}

/// Per-call options. Unset fields fall back to the engine's [`EngineConfig`].
///
/// ```rust
/// use sql_engine::prelude::*;
///
/// let opts = QueryOptions::new()
///     .timeout(Timeout::millis(500))
///     .source("users")
///     .log(false);
/// # let _ = opts;
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub timeout: Option<Timeout>,
    pub pool_timeout: Option<Timeout>,
    pub log: Option<bool>,
    /// Stream batch size.
    pub max_rows: Option<usize>,
    /// Table or schema source, for log attribution.
    pub source: Option<String>,
    /// Identity of the calling code, for log attribution.
    pub caller: Option<String>,
    /// Row-lock clause used by migration locking; empty disables the clause.
    pub migration_lock: Option<String>,
}

impl QueryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn pool_timeout(mut self, timeout: Timeout) -> Self {
        self.pool_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn log(mut self, log: bool) -> Self {
        self.log = Some(log);
        self
    }

    #[must_use]
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    #[must_use]
    pub fn migration_lock(mut self, clause: impl Into<String>) -> Self {
        self.migration_lock = Some(clause.into());
        self
    }

    /// Merge with engine defaults.
    pub(crate) fn resolve(&self, config: &EngineConfig) -> CallOptions {
        CallOptions {
            timeout: self.timeout.unwrap_or(Timeout::millis(config.timeout_ms)),
            pool_timeout: self
                .pool_timeout
                .unwrap_or(Timeout::millis(config.pool_timeout_ms)),
            log: self.log.unwrap_or(config.log),
            max_rows: self.max_rows.unwrap_or(config.max_rows).max(1),
            source: self.source.clone(),
            caller: self.caller.clone(),
        }
    }
}

/// Fully resolved options for one dispatched call.
#[derive(Debug, Clone)]
pub(crate) struct CallOptions {
    pub timeout: Timeout,
    pub pool_timeout: Timeout,
    pub log: bool,
    pub max_rows: usize,
    pub source: Option<String>,
    pub caller: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_take_engine_defaults() {
        let config = EngineConfig::default();
        let resolved = QueryOptions::new().source("users").resolve(&config);
        assert_eq!(resolved.timeout, Timeout::millis(15_000));
        assert_eq!(resolved.pool_timeout, Timeout::millis(5_000));
        assert!(resolved.log);
        assert_eq!(resolved.max_rows, 500);
        assert_eq!(resolved.source.as_deref(), Some("users"));
    }

    #[test]
    fn per_call_values_win() {
        let config = EngineConfig::default();
        let resolved = QueryOptions::new()
            .timeout(Timeout::Infinity)
            .log(false)
            .max_rows(0)
            .resolve(&config);
        assert_eq!(resolved.timeout, Timeout::Infinity);
        assert!(!resolved.log);
        assert_eq!(resolved.max_rows, 1);
    }

    #[tokio::test]
    async fn timeout_reports_the_bound() {
        let limit = Duration::from_millis(10);
        let res = Timeout::After(limit)
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(res, Err(limit));
        assert_eq!(Timeout::Infinity.run(async { 7 }).await, Ok(7));
    }
}
