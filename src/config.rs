use serde::Deserialize;

use crate::error::SqlEngineError;

/// Engine-wide defaults and pool sizing.
///
/// Deserializable so it can sit inside an application's own config file:
/// ```rust
/// use sql_engine::prelude::*;
///
/// let cfg: EngineConfig = serde_json::from_str(r#"{ "pool_size": 4, "log": false }"#).unwrap();
/// assert_eq!(cfg.pool_size, 4);
/// assert_eq!(cfg.timeout_ms, 15_000);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool_size: u32,
    pub pool_timeout_ms: u64,
    pub timeout_ms: u64,
    pub log: bool,
    pub max_rows: usize,
    /// Row-lock clause for migration locking; `None` uses the driver's default.
    pub migration_lock: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            pool_timeout_ms: 5_000,
            timeout_ms: 15_000,
            log: true,
            max_rows: 500,
            migration_lock: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Reject configurations the pool cannot be built from.
    ///
    /// # Errors
    /// Returns `SqlEngineError::Config` when `pool_size` is zero.
    pub fn validate(&self) -> Result<(), SqlEngineError> {
        if self.pool_size == 0 {
            return Err(SqlEngineError::Config(
                "pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    cfg: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.cfg.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn pool_timeout_ms(mut self, ms: u64) -> Self {
        self.cfg.pool_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.cfg.timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn log(mut self, log: bool) -> Self {
        self.cfg.log = log;
        self
    }

    #[must_use]
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.cfg.max_rows = max_rows;
        self
    }

    #[must_use]
    pub fn migration_lock(mut self, clause: impl Into<String>) -> Self {
        self.cfg.migration_lock = Some(clause.into());
        self
    }

    #[must_use]
    pub fn finish(self) -> EngineConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pool_is_rejected() {
        let cfg = EngineConfig::builder().pool_size(0).finish();
        assert!(matches!(cfg.validate(), Err(SqlEngineError::Config(_))));
        assert!(EngineConfig::default().validate().is_ok());
    }
}
