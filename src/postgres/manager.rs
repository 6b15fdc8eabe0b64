use std::collections::HashMap;
use std::future::Future;

use bb8::ManageConnection;
use tokio_postgres::{Client, NoTls};

use crate::error::DriverError;

/// bb8 manager for Postgres clients.
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
}

impl PgManager {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }
}

/// A client plus the statements prepared on it, by engine statement name.
pub struct PgConnection {
    pub(crate) client: Client,
    pub(crate) statements: HashMap<String, tokio_postgres::Statement>,
}

impl PgConnection {
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Whether `name` is prepared on this connection.
    #[must_use]
    pub fn has_statement(&self, name: &str) -> bool {
        self.statements.contains_key(name)
    }

    /// Forget every preparation, as after a server-side `DISCARD ALL`.
    pub fn clear_statements(&mut self) {
        self.statements.clear();
    }
}

impl ManageConnection for PgManager {
    type Connection = PgConnection;
    type Error = DriverError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        async move {
            tracing::debug!(
                target: "sql_engine::postgres",
                hosts = ?cfg.get_hosts(),
                db = ?cfg.get_dbname(),
                user = ?cfg.get_user(),
                "connect start"
            );
            let (client, connection) = cfg.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!(target: "sql_engine::postgres", error = %e, "connection closed");
                }
            });
            Ok(PgConnection {
                client,
                statements: HashMap::new(),
            })
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            conn.client
                .simple_query("SELECT 1")
                .await
                .map(|_| ())
                .map_err(DriverError::from)
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.client.is_closed()
    }
}
