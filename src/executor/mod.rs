//! Execution engine: turns a [`QueryIntent`] into driver calls and keeps the statement cache
//! consistent with what each call reports.

mod dispatch;
mod stream;

pub(crate) use dispatch::{Call, CallOutput};
pub use stream::QueryStream;

use crate::cache::{CompiledStatement, QueryIntent};
use crate::driver::{Driver, Statement};
use crate::engine::EngineInner;
use crate::error::{DriverErrorKind, SqlEngineError};
use crate::options::CallOptions;
use crate::results::QueryResult;
use crate::types::RowValues;

impl<D: Driver> EngineInner<D> {
    pub(crate) async fn execute(
        &self,
        intent: QueryIntent<D::Prepared>,
        params: &[RowValues],
        opts: &CallOptions,
    ) -> Result<QueryResult, SqlEngineError> {
        match intent {
            QueryIntent::Cache(statement) => {
                let (prepared, result) = self.prepare_execute(&statement, params, opts).await?;
                self.statements.refresh(&statement, prepared);
                Ok(result)
            }
            QueryIntent::CacheUpdatable(statement, on_refresh) => {
                let (prepared, result) = self.prepare_execute(&statement, params, opts).await?;
                on_refresh(statement.id(), prepared);
                Ok(result)
            }
            QueryIntent::CachedReadOnly(handle, on_reset) => {
                let name = handle.statement.name();
                let call = Call::Execute {
                    statement: Statement::Prepared {
                        name: &name,
                        handle: &handle.prepared,
                    },
                    sql: handle.statement.sql(),
                    params,
                };
                match self.dispatch(call, opts).await {
                    Ok(output) => output.into_result(),
                    Err(SqlEngineError::Driver(err)) if err.kind == DriverErrorKind::Reset => {
                        tracing::debug!(
                            target: "sql_engine::cache",
                            statement = %handle.statement.id(),
                            "prepared statement reset by driver"
                        );
                        on_reset(handle.statement.id(), handle.statement.sql());
                        Err(SqlEngineError::Reset { name, source: err })
                    }
                    Err(err) => Err(err),
                }
            }
            QueryIntent::NoCache(statement) => {
                let sql = statement.sql();
                let call = Call::Execute {
                    statement: Statement::Text(sql),
                    sql,
                    params,
                };
                self.dispatch(call, opts).await?.into_result()
            }
        }
    }

    async fn prepare_execute(
        &self,
        statement: &CompiledStatement,
        params: &[RowValues],
        opts: &CallOptions,
    ) -> Result<(D::Prepared, QueryResult), SqlEngineError> {
        let name = statement.name();
        let call = Call::PrepareExecute {
            name: &name,
            sql: statement.sql(),
            params,
        };
        self.dispatch(call, opts).await?.into_prepared_result()
    }

    /// Prepare without executing, memoizing the handle.
    pub(crate) async fn prepare(
        &self,
        statement: &CompiledStatement,
        opts: &CallOptions,
    ) -> Result<D::Prepared, SqlEngineError> {
        let name = statement.name();
        let call = Call::Prepare {
            name: &name,
            sql: statement.sql(),
        };
        let prepared = self.dispatch(call, opts).await?.into_prepared()?;
        self.statements.refresh(statement, prepared.clone());
        Ok(prepared)
    }
}
