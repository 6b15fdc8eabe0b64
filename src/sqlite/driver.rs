use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use rusqlite::types::Value;

use super::manager::{SqliteConnection, SqliteManager};
use super::{params, query};
use crate::driver::{Constraint, ConstraintKind, Driver, Statement};
use crate::error::DriverError;
use crate::results::QueryResult;
use crate::types::RowValues;

static CONSTRAINT_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:UNIQUE|CHECK) constraint failed: (?:index '([^']+)'|(.+))$")
        .expect("constraint message pattern is valid")
});

/// Logical handle for a statement prepared under an engine name.
#[derive(Debug, Clone)]
pub struct SqlitePrepared {
    name: Arc<str>,
    sql: Arc<str>,
}

impl SqlitePrepared {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Cursor over a query, read one page of `max_rows` rows per fetch. Each page re-runs the query
/// with `LIMIT`/`OFFSET`, so rows past the current page are never stepped.
#[derive(Debug)]
pub struct SqliteCursor {
    paged_sql: String,
    params: Vec<Value>,
    max_rows: usize,
    offset: usize,
    exhausted: bool,
}

impl SqliteCursor {
    fn new(sql: &str, params: Vec<Value>, max_rows: usize) -> Self {
        let limit = params.len() + 1;
        let offset = params.len() + 2;
        let body = sql.trim().trim_end_matches(';');
        Self {
            paged_sql: format!("SELECT * FROM ({body}) LIMIT ?{limit} OFFSET ?{offset}"),
            params,
            max_rows,
            offset: 0,
            exhausted: false,
        }
    }

    fn page_params(&self) -> Result<Vec<Value>, DriverError> {
        let bound = |n: usize| {
            i64::try_from(n)
                .map(Value::Integer)
                .map_err(|_| DriverError::other(format!("cursor position {n} out of range")))
        };
        let mut values = self.params.clone();
        values.push(bound(self.max_rows)?);
        values.push(bound(self.offset)?);
        Ok(values)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

/// Resolve `statement` to SQL text and whether it goes through rusqlite's statement cache.
fn resolve(
    conn: &SqliteConnection,
    statement: Statement<'_, SqlitePrepared>,
) -> Result<(String, bool), DriverError> {
    match statement {
        Statement::Text(sql) => Ok((sql.to_string(), false)),
        Statement::Prepared { name, .. } => match conn.prepared.get(name) {
            Some(sql) => Ok((sql.to_string(), true)),
            None => Err(DriverError::reset(format!(
                "prepared statement \"{name}\" does not exist on this connection"
            ))),
        },
    }
}

async fn run(
    conn: &SqliteConnection,
    sql: String,
    cached: bool,
    params: &[RowValues],
) -> Result<QueryResult, DriverError> {
    let values = params::convert(params);
    conn.run_blocking(move |c| {
        if cached {
            let mut stmt = c.prepare_cached(&sql)?;
            query::run_statement(&mut stmt, &values)
        } else {
            let mut stmt = c.prepare(&sql)?;
            query::run_statement(&mut stmt, &values)
        }
    })
    .await
}

/// Turn `UNIQUE constraint failed: users.email, users.org` into `users_email_org_index`.
fn unique_index_name(columns: &str) -> String {
    let mut table = None;
    let mut fields = Vec::new();
    for column in columns.split(',').map(str::trim) {
        match column.split_once('.') {
            Some((t, field)) => {
                table.get_or_insert(t);
                fields.push(field);
            }
            None => fields.push(column),
        }
    }
    match table {
        Some(table) => format!("{table}_{}_index", fields.join("_")),
        None => format!("{}_index", fields.join("_")),
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    type Manager = SqliteManager;
    type Prepared = SqlitePrepared;
    type Cursor = SqliteCursor;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn default_migration_lock(&self) -> Option<&'static str> {
        None
    }

    async fn prepare(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
        sql: &str,
    ) -> Result<SqlitePrepared, DriverError> {
        let text = sql.to_string();
        conn.run_blocking(move |c| {
            c.prepare_cached(&text)?;
            Ok(())
        })
        .await?;
        let sql: Arc<str> = Arc::from(sql);
        conn.prepared.insert(name.to_string(), Arc::clone(&sql));
        Ok(SqlitePrepared {
            name: Arc::from(name),
            sql,
        })
    }

    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        statement: Statement<'_, SqlitePrepared>,
        params: &[RowValues],
    ) -> Result<QueryResult, DriverError> {
        let (sql, cached) = resolve(conn, statement)?;
        run(conn, sql, cached, params).await
    }

    async fn declare(
        &self,
        conn: &mut SqliteConnection,
        statement: Statement<'_, SqlitePrepared>,
        params: &[RowValues],
        max_rows: usize,
    ) -> Result<SqliteCursor, DriverError> {
        let (sql, _) = resolve(conn, statement)?;
        let cursor = SqliteCursor::new(&sql, params::convert(params), max_rows.max(1));
        let paged = cursor.paged_sql.clone();
        conn.run_blocking(move |c| {
            c.prepare_cached(&paged)?;
            Ok(())
        })
        .await?;
        Ok(cursor)
    }

    async fn fetch(
        &self,
        conn: &mut SqliteConnection,
        cursor: &mut SqliteCursor,
    ) -> Result<Option<QueryResult>, DriverError> {
        if cursor.exhausted {
            return Ok(None);
        }
        let paged = cursor.paged_sql.clone();
        let values = cursor.page_params()?;
        let page = conn
            .run_blocking(move |c| {
                let mut stmt = c.prepare_cached(&paged)?;
                query::build_result(&mut stmt, &values)
            })
            .await;
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                cursor.exhausted = true;
                return Err(err);
            }
        };
        cursor.offset += page.num_rows;
        if page.num_rows < cursor.max_rows {
            cursor.exhausted = true;
        }
        if page.num_rows == 0 {
            return Ok(None);
        }
        Ok(Some(page))
    }

    async fn deallocate(
        &self,
        _conn: &mut SqliteConnection,
        cursor: SqliteCursor,
    ) -> Result<(), DriverError> {
        drop(cursor);
        Ok(())
    }

    async fn begin(&self, conn: &mut SqliteConnection) -> Result<(), DriverError> {
        conn.run_blocking(|c| c.execute_batch("BEGIN").map_err(DriverError::from))
            .await
    }

    async fn commit(&self, conn: &mut SqliteConnection) -> Result<(), DriverError> {
        conn.run_blocking(|c| c.execute_batch("COMMIT").map_err(DriverError::from))
            .await
    }

    async fn rollback(&self, conn: &mut SqliteConnection) -> Result<(), DriverError> {
        conn.run_blocking(|c| c.execute_batch("ROLLBACK").map_err(DriverError::from))
            .await
    }

    fn classify_constraints(&self, err: &DriverError) -> Vec<Constraint> {
        let Some(code) = err.code.as_deref().and_then(|c| c.parse::<i32>().ok()) else {
            return Vec::new();
        };
        let captured = CONSTRAINT_FAILED.captures(&err.message);
        let index = captured
            .as_ref()
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        let detail = captured.as_ref().and_then(|caps| caps.get(2)).map(|m| m.as_str());
        match code {
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                let name = index
                    .or_else(|| detail.map(unique_index_name))
                    .unwrap_or_else(|| "unknown".to_string());
                vec![Constraint::new(ConstraintKind::Unique, name)]
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_CHECK => {
                let name = index
                    .or_else(|| detail.map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                vec![Constraint::new(ConstraintKind::Check, name)]
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                vec![Constraint::new(ConstraintKind::ForeignKey, "foreign_key")]
            }
            _ => Vec::new(),
        }
    }
}
