use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio_postgres::Client;

use super::manager::{PgConnection, PgManager};
use super::{params, query};
use crate::driver::{Constraint, ConstraintKind, Driver, Statement};
use crate::error::{DriverError, DriverErrorKind};
use crate::results::QueryResult;
use crate::types::RowValues;

/// `cached plan must not change result type`: the server dropped a plan after a schema change.
const FEATURE_NOT_SUPPORTED: &str = "0A000";
/// `canceling statement due to statement timeout` (or a user cancel).
const QUERY_CANCELED: &str = "57014";

static NEXT_CURSOR: AtomicU64 = AtomicU64::new(1);

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        let code = err.code().map(|c| c.code().to_string());
        let message = match err.as_db_error() {
            Some(db) => db.to_string(),
            None => err.to_string(),
        };
        let mut out = DriverError::new(error_kind(code.as_deref()), message).with_source(err);
        out.code = code;
        out
    }
}

fn error_kind(sqlstate: Option<&str>) -> DriverErrorKind {
    match sqlstate {
        Some(QUERY_CANCELED) => DriverErrorKind::Timeout,
        _ => DriverErrorKind::Other,
    }
}

/// Logical handle for a statement prepared under an engine name. The server-side statement lives
/// in each [`PgConnection`]'s map.
#[derive(Debug, Clone)]
pub struct PgPrepared {
    name: Arc<str>,
    sql: Arc<str>,
}

impl PgPrepared {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// A `DECLARE`d cursor, fetched `max_rows` at a time.
#[derive(Debug)]
pub struct PgCursor {
    name: String,
    max_rows: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

fn missing(name: &str) -> DriverError {
    DriverError::reset(format!(
        "prepared statement \"{name}\" does not exist on this connection"
    ))
}

async fn run(
    client: &Client,
    stmt: &tokio_postgres::Statement,
    params: &[RowValues],
) -> Result<QueryResult, DriverError> {
    let refs = params::as_refs(params);
    if stmt.columns().is_empty() {
        let affected = client.execute(stmt, &refs).await?;
        let affected = usize::try_from(affected).map_err(|e| {
            DriverError::other(format!("postgres affected rows conversion error: {e}"))
        })?;
        return Ok(QueryResult::affected(affected));
    }
    let rows = client.query(stmt, &refs).await?;
    query::build_result(stmt.columns(), &rows)
}

#[async_trait]
impl Driver for PostgresDriver {
    type Manager = PgManager;
    type Prepared = PgPrepared;
    type Cursor = PgCursor;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn prepare(
        &self,
        conn: &mut PgConnection,
        name: &str,
        sql: &str,
    ) -> Result<PgPrepared, DriverError> {
        let stmt = conn.client.prepare(sql).await?;
        conn.statements.insert(name.to_string(), stmt);
        Ok(PgPrepared {
            name: Arc::from(name),
            sql: Arc::from(sql),
        })
    }

    async fn execute(
        &self,
        conn: &mut PgConnection,
        statement: Statement<'_, PgPrepared>,
        params: &[RowValues],
    ) -> Result<QueryResult, DriverError> {
        match statement {
            Statement::Text(sql) => {
                let stmt = conn.client.prepare(sql).await?;
                run(&conn.client, &stmt, params).await
            }
            Statement::Prepared { name, .. } => {
                let Some(stmt) = conn.statements.get(name).cloned() else {
                    return Err(missing(name));
                };
                match run(&conn.client, &stmt, params).await {
                    Err(err) if err.code.as_deref() == Some(FEATURE_NOT_SUPPORTED) => {
                        conn.statements.remove(name);
                        Err(DriverError {
                            kind: DriverErrorKind::Reset,
                            ..err
                        })
                    }
                    other => other,
                }
            }
        }
    }

    async fn declare(
        &self,
        conn: &mut PgConnection,
        statement: Statement<'_, PgPrepared>,
        params: &[RowValues],
        max_rows: usize,
    ) -> Result<PgCursor, DriverError> {
        let sql = match statement {
            Statement::Text(sql) => sql,
            Statement::Prepared { name, handle } => {
                if !conn.statements.contains_key(name) {
                    return Err(missing(name));
                }
                handle.sql()
            }
        };
        let cursor = format!("sqe_cursor_{}", NEXT_CURSOR.fetch_add(1, Ordering::Relaxed));
        let declare = format!("DECLARE {cursor} NO SCROLL CURSOR FOR {sql}");
        conn.client
            .execute(declare.as_str(), &params::as_refs(params))
            .await?;
        Ok(PgCursor {
            name: cursor,
            max_rows,
        })
    }

    async fn fetch(
        &self,
        conn: &mut PgConnection,
        cursor: &mut PgCursor,
    ) -> Result<Option<QueryResult>, DriverError> {
        let fetch = format!("FETCH {} FROM {}", cursor.max_rows, cursor.name);
        let rows = conn.client.query(fetch.as_str(), &[]).await?;
        match rows.first() {
            Some(first) => query::build_result(first.columns(), &rows).map(Some),
            None => Ok(None),
        }
    }

    async fn deallocate(&self, conn: &mut PgConnection, cursor: PgCursor) -> Result<(), DriverError> {
        conn.client
            .batch_execute(&format!("CLOSE {}", cursor.name))
            .await?;
        Ok(())
    }

    async fn begin(&self, conn: &mut PgConnection) -> Result<(), DriverError> {
        conn.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&self, conn: &mut PgConnection) -> Result<(), DriverError> {
        conn.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&self, conn: &mut PgConnection) -> Result<(), DriverError> {
        conn.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    fn classify_constraints(&self, err: &DriverError) -> Vec<Constraint> {
        let kind = match err.code.as_deref() {
            Some("23505") => ConstraintKind::Unique,
            Some("23503") => ConstraintKind::ForeignKey,
            Some("23514") => ConstraintKind::Check,
            Some("23P01") => ConstraintKind::Exclusion,
            _ => return Vec::new(),
        };
        let name = err
            .source_as::<tokio_postgres::Error>()
            .and_then(tokio_postgres::Error::as_db_error)
            .and_then(|db| db.constraint())
            .unwrap_or("unknown");
        vec![Constraint::new(kind, name)]
    }
}
