//! The capability set the engine consumes from a database driver.
//!
//! A driver owns no connections itself: the engine hands it a connection leased from the
//! `bb8` pool built over [`Driver::Manager`] and asks it to run one operation.

use std::fmt;

use async_trait::async_trait;
use bb8::ManageConnection;

use crate::error::DriverError;
use crate::results::QueryResult;
use crate::types::RowValues;

/// Physical connection type handed out by a driver's pool manager.
pub type Conn<D> = <<D as Driver>::Manager as ManageConnection>::Connection;

/// What a driver call runs: unnamed SQL text or a statement prepared under `name`.
#[derive(Debug)]
pub enum Statement<'a, P> {
    Text(&'a str),
    Prepared { name: &'a str, handle: &'a P },
}

impl<P> Clone for Statement<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Statement<'_, P> {}

/// Kind of a violated constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    Check,
    Exclusion,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign_key",
            ConstraintKind::Check => "check",
            ConstraintKind::Exclusion => "exclusion",
        })
    }
}

/// A named constraint violation classified from a driver error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub name: String,
}

impl Constraint {
    #[must_use]
    pub fn new(kind: ConstraintKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// `bb8` manager producing this driver's connections.
    type Manager: ManageConnection<Error = DriverError>;
    /// Logical prepared-statement handle; the driver maps it to per-connection state.
    type Prepared: Clone + fmt::Debug + Send + Sync + 'static;
    /// Open server- or client-side cursor used by streaming.
    type Cursor: Send + 'static;

    fn name(&self) -> &'static str;

    /// Lock clause appended by migration locking when none is configured.
    fn default_migration_lock(&self) -> Option<&'static str> {
        Some("FOR UPDATE")
    }

    async fn prepare(
        &self,
        conn: &mut Conn<Self>,
        name: &str,
        sql: &str,
    ) -> Result<Self::Prepared, DriverError>;

    /// Run a statement. Must fail with [`DriverErrorKind::Reset`](crate::DriverErrorKind::Reset)
    /// when `statement` is prepared but the connection no longer holds that preparation.
    async fn execute(
        &self,
        conn: &mut Conn<Self>,
        statement: Statement<'_, Self::Prepared>,
        params: &[RowValues],
    ) -> Result<QueryResult, DriverError>;

    async fn prepare_execute(
        &self,
        conn: &mut Conn<Self>,
        name: &str,
        sql: &str,
        params: &[RowValues],
    ) -> Result<(Self::Prepared, QueryResult), DriverError> {
        let prepared = self.prepare(conn, name, sql).await?;
        let result = self
            .execute(
                conn,
                Statement::Prepared {
                    name,
                    handle: &prepared,
                },
                params,
            )
            .await?;
        Ok((prepared, result))
    }

    /// Open a cursor yielding batches of at most `max_rows` rows.
    async fn declare(
        &self,
        conn: &mut Conn<Self>,
        statement: Statement<'_, Self::Prepared>,
        params: &[RowValues],
        max_rows: usize,
    ) -> Result<Self::Cursor, DriverError>;

    /// Next batch, or `None` once the cursor is exhausted.
    async fn fetch(
        &self,
        conn: &mut Conn<Self>,
        cursor: &mut Self::Cursor,
    ) -> Result<Option<QueryResult>, DriverError>;

    async fn deallocate(
        &self,
        conn: &mut Conn<Self>,
        cursor: Self::Cursor,
    ) -> Result<(), DriverError>;

    async fn begin(&self, conn: &mut Conn<Self>) -> Result<(), DriverError>;

    async fn commit(&self, conn: &mut Conn<Self>) -> Result<(), DriverError>;

    async fn rollback(&self, conn: &mut Conn<Self>) -> Result<(), DriverError>;

    /// Named constraints violated by `err`; empty when the error is not a constraint failure.
    fn classify_constraints(&self, err: &DriverError) -> Vec<crate::driver::Constraint>;
}
