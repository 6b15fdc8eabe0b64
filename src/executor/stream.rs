use std::sync::Arc;

use futures_util::Stream;

use crate::binding::{self, BoundConnection};
use crate::cache::{CompiledStatement, QueryIntent};
use crate::driver::{Driver, Statement};
use crate::engine::EngineInner;
use crate::error::{DriverError, DriverErrorKind, SqlEngineError};
use crate::options::CallOptions;
use crate::results::QueryResult;
use crate::types::RowValues;

use super::Call;

enum StreamState<D: Driver> {
    /// Not polled yet; the intent is consumed on the first batch.
    Pending(QueryIntent<D::Prepared>),
    Open {
        bound: Arc<BoundConnection<D>>,
        cursor: D::Cursor,
    },
    Done,
}

/// Lazy, non-restartable batch stream over one statement.
///
/// Nothing runs until the first [`QueryStream::next_batch`]. Every batch is fetched on the
/// connection bound by the enclosing [`SqlEngine::transaction`](crate::SqlEngine::transaction);
/// advancing the stream outside that transaction fails.
pub struct QueryStream<D: Driver> {
    engine: Arc<EngineInner<D>>,
    statement: CompiledStatement,
    params: Vec<RowValues>,
    opts: CallOptions,
    state: StreamState<D>,
}

impl<D: Driver> QueryStream<D> {
    pub(crate) fn new(
        engine: Arc<EngineInner<D>>,
        intent: QueryIntent<D::Prepared>,
        params: Vec<RowValues>,
        opts: CallOptions,
    ) -> Self {
        Self {
            engine,
            statement: intent.statement().clone(),
            params,
            opts,
            state: StreamState::Pending(intent),
        }
    }

    /// Next batch of at most `max_rows` rows, or `None` once the cursor is exhausted.
    ///
    /// # Errors
    /// `NotInTransaction` when no transaction is bound in this task, `StreamClosed` once the
    /// transaction that opened the cursor has finished, an ownership error when advanced from a
    /// different task, or the driver error of the fetch.
    pub async fn next_batch(&mut self) -> Result<Option<QueryResult>, SqlEngineError> {
        if let StreamState::Pending(_) = self.state {
            let Some(bound) = binding::lookup::<D>(self.engine.pool_id) else {
                self.state = StreamState::Done;
                return Err(SqlEngineError::NotInTransaction("stream"));
            };
            let StreamState::Pending(intent) =
                std::mem::replace(&mut self.state, StreamState::Done)
            else {
                return Ok(None);
            };
            let cursor = declare(
                &self.engine,
                &bound,
                &self.statement,
                &self.params,
                &self.opts,
                intent,
            )
            .await?;
            self.state = StreamState::Open { bound, cursor };
        }

        let StreamState::Open { bound, cursor } = &mut self.state else {
            return Ok(None);
        };
        if bound.is_closed() {
            self.state = StreamState::Done;
            return Err(SqlEngineError::StreamClosed);
        }
        if binding::current_context() != Some(bound.context()) {
            return Err(SqlEngineError::from_driver(DriverError::ownership(
                "stream advanced from a task that does not own its connection",
            )));
        }

        let call = Call::Fetch {
            cursor,
            sql: self.statement.sql(),
        };
        let batch = match self
            .engine
            .dispatch_bound(&**bound, call, &self.opts, None)
            .await
        {
            Ok(output) => output.into_batch(),
            Err(err) => Err(err),
        };
        match batch {
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                if let StreamState::Open { bound, cursor } =
                    std::mem::replace(&mut self.state, StreamState::Done)
                {
                    let call = Call::Deallocate {
                        cursor,
                        sql: self.statement.sql(),
                    };
                    self.engine
                        .dispatch_bound(&bound, call, &self.opts, None)
                        .await?;
                }
                Ok(None)
            }
            Err(err) => {
                self.state = StreamState::Done;
                Err(err)
            }
        }
    }

    /// Adapt into a `futures` stream of batches.
    pub fn into_stream(self) -> impl Stream<Item = Result<QueryResult, SqlEngineError>> + Send {
        futures_util::stream::try_unfold(self, |mut stream| async move {
            Ok(stream.next_batch().await?.map(|batch| (batch, stream)))
        })
    }
}

/// Open the cursor for `intent` on the bound connection. Cache intents prepare first so the
/// cursor runs the memoized statement; `CachedReadOnly` follows the reset protocol.
async fn declare<D: Driver>(
    engine: &EngineInner<D>,
    bound: &BoundConnection<D>,
    statement: &CompiledStatement,
    params: &[RowValues],
    opts: &CallOptions,
    intent: QueryIntent<D::Prepared>,
) -> Result<D::Cursor, SqlEngineError> {
    let sql = statement.sql();
    let name = statement.name();

    let prepared = match intent {
        QueryIntent::NoCache(_) => None,
        QueryIntent::Cache(statement) => {
            let prepared = prepare_on(engine, bound, &name, sql, opts).await?;
            engine.statements.refresh(&statement, prepared.clone());
            Some(prepared)
        }
        QueryIntent::CacheUpdatable(statement, on_refresh) => {
            let prepared = prepare_on(engine, bound, &name, sql, opts).await?;
            on_refresh(statement.id(), prepared.clone());
            Some(prepared)
        }
        QueryIntent::CachedReadOnly(handle, on_reset) => {
            let call = Call::Declare {
                statement: Statement::Prepared {
                    name: &name,
                    handle: &handle.prepared,
                },
                sql,
                params,
                max_rows: opts.max_rows,
            };
            return match engine.dispatch_bound(bound, call, opts, None).await {
                Ok(output) => output.into_cursor(),
                Err(SqlEngineError::Driver(err)) if err.kind == DriverErrorKind::Reset => {
                    on_reset(handle.statement.id(), sql);
                    Err(SqlEngineError::Reset { name, source: err })
                }
                Err(err) => Err(err),
            };
        }
    };

    let target = match &prepared {
        Some(handle) => Statement::Prepared {
            name: &name,
            handle,
        },
        None => Statement::Text(sql),
    };
    let call = Call::Declare {
        statement: target,
        sql,
        params,
        max_rows: opts.max_rows,
    };
    engine
        .dispatch_bound(bound, call, opts, None)
        .await?
        .into_cursor()
}

async fn prepare_on<D: Driver>(
    engine: &EngineInner<D>,
    bound: &BoundConnection<D>,
    name: &str,
    sql: &str,
    opts: &CallOptions,
) -> Result<D::Prepared, SqlEngineError> {
    engine
        .dispatch_bound(bound, Call::Prepare { name, sql }, opts, None)
        .await?
        .into_prepared()
}
