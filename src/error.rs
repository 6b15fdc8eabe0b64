use std::any::Any;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::RowValues;

/// Hint appended to driver errors raised when a connection leased by one execution context is
/// used from another.
pub(crate) const OWNERSHIP_HINT: &str = "\n\nThe connection is bound to another task. \
Connections checked out inside `SqlEngine::transaction` are pinned to the task that opened the \
transaction; run the work inside that task (or open a transaction in the spawned task) instead of \
moving streams or bound work across `tokio::spawn`.";

/// Broad classes of driver failures the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Network, syntax, constraint, or any other failure.
    Other,
    /// A prepared statement is no longer valid on the current connection.
    Reset,
    /// The connection is leased by another execution context.
    Ownership,
    /// The driver gave up waiting on the database.
    Timeout,
}

/// Error reported by a [`Driver`](crate::driver::Driver) implementation.
#[derive(Debug)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
    /// Backend error code (SQLSTATE for Postgres, extended result code for `SQLite`).
    pub code: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl DriverError {
    #[must_use]
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Other, message)
    }

    #[must_use]
    pub fn reset(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Reset, message)
    }

    #[must_use]
    pub fn ownership(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Ownership, message)
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Downcast the wrapped backend error, if any.
    #[must_use]
    pub fn source_as<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }
}

/// Value carried out of a transaction by [`SqlEngine::rollback`](crate::SqlEngine::rollback).
pub struct RollbackValue(Box<dyn Any + Send + Sync>);

impl RollbackValue {
    pub(crate) fn new<V: Any + Send + Sync>(value: V) -> Self {
        Self(Box::new(value))
    }

    #[must_use]
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.0.downcast_ref::<V>()
    }

    /// Take the value back out.
    ///
    /// # Errors
    /// Returns `self` unchanged when the value is not a `V`.
    pub fn downcast<V: Any>(self) -> Result<V, Self> {
        self.0.downcast::<V>().map(|v| *v).map_err(Self)
    }
}

impl fmt::Debug for RollbackValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RollbackValue").field(&"<any>").finish()
    }
}

#[derive(Debug, Error)]
pub enum SqlEngineError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The prepared statement was invalidated; the cache entry has been reset and the caller
    /// should resubmit.
    #[error("prepared statement {name} was reset: {source}")]
    Reset {
        name: String,
        #[source]
        source: DriverError,
    },

    #[error("{message}")]
    Ownership {
        message: String,
        #[source]
        source: Option<DriverError>,
    },

    #[error(
        "expected at most one row to be affected in {origin} with params {params:?}, got: {count}"
    )]
    MultipleRows {
        origin: String,
        params: Vec<RowValues>,
        count: usize,
    },

    #[error("{0} must be called inside a transaction")]
    NotInTransaction(&'static str),

    #[error("stream advanced after its transaction finished")]
    StreamClosed,

    #[error("transaction rolled back")]
    Rollback(RollbackValue),

    #[error("transaction rolled back because a nested transaction failed")]
    RollbackOnly,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    #[error("Connection error: {0}")]
    Pool(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("SQL execution error: {0}")]
    Execution(String),
}

impl SqlEngineError {
    /// The driver error behind this error, when there is one.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Driver(err) | Self::Reset { source: err, .. } => Some(err),
            Self::Ownership { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    /// Translate a raw driver error the way the dispatcher surfaces it: ownership failures get
    /// a remediation hint, everything else passes through.
    pub(crate) fn from_driver(err: DriverError) -> Self {
        match err.kind {
            DriverErrorKind::Ownership => Self::Ownership {
                message: format!("{}{OWNERSHIP_HINT}", err.message),
                source: Some(err),
            },
            _ => Self::Driver(err),
        }
    }

    /// [`from_driver`](Self::from_driver) for a call that ran for `elapsed`: a driver that gave
    /// up waiting on the database surfaces as [`SqlEngineError::Timeout`].
    pub(crate) fn from_driver_after(err: DriverError, elapsed: Duration) -> Self {
        if err.kind == DriverErrorKind::Timeout {
            tracing::debug!(error = %err, code = ?err.code, "driver timed out");
            return Self::Timeout(elapsed);
        }
        Self::from_driver(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_errors_carry_hint_and_source() {
        let err = SqlEngineError::from_driver(DriverError::ownership("connection owned by #7"));
        let msg = err.to_string();
        assert!(msg.starts_with("connection owned by #7"));
        assert!(msg.contains("bound to another task"));
        assert!(err.driver_error().is_some());
    }

    #[test]
    fn other_errors_pass_through_unchanged() {
        let err = SqlEngineError::from_driver(DriverError::other("syntax error at or near"));
        assert_eq!(err.to_string(), "syntax error at or near");
        assert!(matches!(err, SqlEngineError::Driver(_)));
    }

    #[test]
    fn driver_timeouts_become_engine_timeouts() {
        let elapsed = Duration::from_millis(30);
        let err = SqlEngineError::from_driver_after(
            DriverError::new(DriverErrorKind::Timeout, "canceling statement due to statement timeout"),
            elapsed,
        );
        assert!(matches!(err, SqlEngineError::Timeout(d) if d == elapsed));

        let err = SqlEngineError::from_driver_after(DriverError::other("boom"), elapsed);
        assert!(matches!(err, SqlEngineError::Driver(_)));
    }

    #[test]
    fn rollback_value_downcasts() {
        let value = RollbackValue::new("nope");
        assert_eq!(value.downcast_ref::<&str>(), Some(&"nope"));
        let value = value.downcast::<i32>().unwrap_err();
        assert_eq!(value.downcast::<&str>().unwrap(), "nope");
    }
}
