use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use bb8::ManageConnection;

use crate::error::{DriverError, DriverErrorKind};

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        let (kind, code) = match &err {
            rusqlite::Error::SqliteFailure(e, _) => {
                let kind = match e.code {
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::OperationInterrupted => {
                        DriverErrorKind::Timeout
                    }
                    _ => DriverErrorKind::Other,
                };
                (kind, Some(e.extended_code.to_string()))
            }
            _ => (DriverErrorKind::Other, None),
        };
        let mut out = DriverError::new(kind, err.to_string()).with_source(err);
        out.code = code;
        out
    }
}

/// bb8 manager opening `rusqlite` connections on one database file.
pub struct SqliteManager {
    db_path: String,
}

impl SqliteManager {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

/// A pooled `SQLite` connection and the statement names prepared on it.
pub struct SqliteConnection {
    handle: Arc<Mutex<rusqlite::Connection>>,
    pub(crate) prepared: HashMap<String, Arc<str>>,
}

impl SqliteConnection {
    /// Whether `name` is prepared on this connection.
    #[must_use]
    pub fn has_statement(&self, name: &str) -> bool {
        self.prepared.contains_key(name)
    }

    /// Forget every preparation.
    pub fn clear_statements(&mut self) {
        self.prepared.clear();
    }

    /// Run `func` against the raw connection on the blocking pool.
    ///
    /// # Errors
    /// Returns the closure's error, or `DriverError` if the blocking task failed.
    pub async fn run_blocking<F, R>(&self, func: F) -> Result<R, DriverError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, DriverError> + Send + 'static,
        R: Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || {
            let mut guard = match handle.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            func(&mut guard)
        })
        .await
        .map_err(|e| DriverError::other(format!("sqlite worker join error: {e}")))?
    }
}

impl ManageConnection for SqliteManager {
    type Connection = SqliteConnection;
    type Error = DriverError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.db_path.clone();
        async move {
            let conn = tokio::task::spawn_blocking(move || {
                let conn = rusqlite::Connection::open(&path)?;
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA busy_timeout = 5000;
                    PRAGMA foreign_keys = ON;
                ",
                )?;
                Ok::<_, DriverError>(conn)
            })
            .await
            .map_err(|e| DriverError::other(format!("sqlite connect join error: {e}")))??;
            Ok(SqliteConnection {
                handle: Arc::new(Mutex::new(conn)),
                prepared: HashMap::new(),
            })
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            conn.run_blocking(|c| c.execute_batch("SELECT 1").map_err(DriverError::from))
                .await
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
