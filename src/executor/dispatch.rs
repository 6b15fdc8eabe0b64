use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::binding::{self, BoundConnection, Leased};
use crate::driver::{Conn, Driver, Statement};
use crate::engine::{EngineInner, UNBOUNDED_CHECKOUT};
use crate::error::SqlEngineError;
use crate::options::{CallOptions, Timeout};
use crate::results::QueryResult;
use crate::telemetry::{CallKind, LogEntry};
use crate::types::RowValues;

/// One driver operation, with the SQL text it runs for log attribution.
pub(crate) enum Call<'a, D: Driver> {
    Prepare {
        name: &'a str,
        sql: &'a str,
    },
    Execute {
        statement: Statement<'a, D::Prepared>,
        sql: &'a str,
        params: &'a [RowValues],
    },
    PrepareExecute {
        name: &'a str,
        sql: &'a str,
        params: &'a [RowValues],
    },
    Declare {
        statement: Statement<'a, D::Prepared>,
        sql: &'a str,
        params: &'a [RowValues],
        max_rows: usize,
    },
    Fetch {
        cursor: &'a mut D::Cursor,
        sql: &'a str,
    },
    Deallocate {
        cursor: D::Cursor,
        sql: &'a str,
    },
    Begin,
    Commit,
    Rollback,
}

impl<D: Driver> Call<'_, D> {
    fn kind(&self) -> CallKind {
        match self {
            Call::Prepare { .. } => CallKind::Prepare,
            Call::Execute { .. } => CallKind::Execute,
            Call::PrepareExecute { .. } => CallKind::PrepareExecute,
            Call::Declare { .. } => CallKind::Declare,
            Call::Fetch { .. } => CallKind::Fetch,
            Call::Deallocate { .. } => CallKind::Deallocate,
            Call::Begin => CallKind::Begin,
            Call::Commit => CallKind::Commit,
            Call::Rollback => CallKind::Rollback,
        }
    }

    fn sql(&self) -> Option<&str> {
        match self {
            Call::Prepare { sql, .. }
            | Call::Execute { sql, .. }
            | Call::PrepareExecute { sql, .. }
            | Call::Declare { sql, .. }
            | Call::Fetch { sql, .. }
            | Call::Deallocate { sql, .. } => Some(sql),
            Call::Begin => Some("BEGIN"),
            Call::Commit => Some("COMMIT"),
            Call::Rollback => Some("ROLLBACK"),
        }
    }

    fn params(&self) -> &[RowValues] {
        match self {
            Call::Execute { params, .. }
            | Call::PrepareExecute { params, .. }
            | Call::Declare { params, .. } => params,
            _ => &[],
        }
    }
}

pub(crate) enum CallOutput<D: Driver> {
    Prepared(D::Prepared),
    Result(QueryResult),
    PreparedResult(D::Prepared, QueryResult),
    Cursor(D::Cursor),
    Batch(Option<QueryResult>),
    Done,
}

impl<D: Driver> CallOutput<D> {
    fn result(&self) -> Option<&QueryResult> {
        match self {
            CallOutput::Result(result)
            | CallOutput::PreparedResult(_, result)
            | CallOutput::Batch(Some(result)) => Some(result),
            _ => None,
        }
    }

    fn summary(&self) -> String {
        match self {
            CallOutput::Prepared(_) => "prepared".to_string(),
            CallOutput::Cursor(_) => "cursor declared".to_string(),
            CallOutput::Batch(None) => "cursor exhausted".to_string(),
            CallOutput::Done => "ok".to_string(),
            _ => self.result().map(QueryResult::summary).unwrap_or_default(),
        }
    }

    pub(crate) fn into_result(self) -> Result<QueryResult, SqlEngineError> {
        match self {
            CallOutput::Result(result) => Ok(result),
            _ => Err(unexpected()),
        }
    }

    pub(crate) fn into_prepared_result(self) -> Result<(D::Prepared, QueryResult), SqlEngineError> {
        match self {
            CallOutput::PreparedResult(prepared, result) => Ok((prepared, result)),
            _ => Err(unexpected()),
        }
    }

    pub(crate) fn into_prepared(self) -> Result<D::Prepared, SqlEngineError> {
        match self {
            CallOutput::Prepared(prepared) => Ok(prepared),
            _ => Err(unexpected()),
        }
    }

    pub(crate) fn into_cursor(self) -> Result<D::Cursor, SqlEngineError> {
        match self {
            CallOutput::Cursor(cursor) => Ok(cursor),
            _ => Err(unexpected()),
        }
    }

    pub(crate) fn into_batch(self) -> Result<Option<QueryResult>, SqlEngineError> {
        match self {
            CallOutput::Batch(batch) => Ok(batch),
            _ => Err(unexpected()),
        }
    }
}

fn unexpected() -> SqlEngineError {
    SqlEngineError::Execution("driver returned an output of the wrong shape".to_string())
}

impl<D: Driver> EngineInner<D> {
    /// Run `call` on the connection bound to this pool in the current task, or on a fresh
    /// checkout returned to the pool afterwards.
    pub(crate) async fn dispatch(
        &self,
        call: Call<'_, D>,
        opts: &CallOptions,
    ) -> Result<CallOutput<D>, SqlEngineError> {
        if let Some(bound) = binding::lookup::<D>(self.pool_id) {
            return self.dispatch_bound(&bound, call, opts, None).await;
        }

        let started = Instant::now();
        let mut conn = match self.checkout(opts.pool_timeout).await {
            Ok(conn) => conn,
            Err(err) => {
                self.log(&call, opts, Err(&err), Some(started.elapsed()), None, None);
                return Err(err);
            }
        };
        let queue_time = started.elapsed();
        self.run_logged(&mut conn, call, opts, Some(queue_time))
            .await
    }

    /// Run `call` on an already bound connection.
    pub(crate) async fn dispatch_bound(
        &self,
        bound: &BoundConnection<D>,
        call: Call<'_, D>,
        opts: &CallOptions,
        queue_time: Option<Duration>,
    ) -> Result<CallOutput<D>, SqlEngineError> {
        let mut slot = bound.lock().await?;
        let conn = slot.as_mut().ok_or(SqlEngineError::StreamClosed)?;
        self.run_logged(conn, call, opts, queue_time).await
    }

    pub(crate) async fn checkout(&self, pool_timeout: Timeout) -> Result<Leased<D>, SqlEngineError> {
        match pool_timeout.run(self.pool.get_owned()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(bb8::RunError::User(err))) => Err(SqlEngineError::Pool(err.to_string())),
            Ok(Err(bb8::RunError::TimedOut)) => Err(SqlEngineError::PoolTimeout(match pool_timeout {
                Timeout::After(limit) => limit,
                Timeout::Infinity => UNBOUNDED_CHECKOUT,
            })),
            Err(limit) => Err(SqlEngineError::PoolTimeout(limit)),
        }
    }

    async fn run_logged(
        &self,
        conn: &mut Leased<D>,
        call: Call<'_, D>,
        opts: &CallOptions,
        queue_time: Option<Duration>,
    ) -> Result<CallOutput<D>, SqlEngineError> {
        let snapshot = opts.log.then(|| LogSnapshot::of(&call));
        let started = Instant::now();
        let outcome = opts.timeout.run(self.run(&mut **conn, call)).await;
        let elapsed = started.elapsed();
        let outcome = match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(SqlEngineError::from_driver_after(err, elapsed)),
            Err(limit) => Err(SqlEngineError::Timeout(limit)),
        };

        if let Some(snapshot) = snapshot {
            let produced = outcome.as_ref().ok().and_then(CallOutput::result);
            let decode_time = produced.and_then(QueryResult::decode_time);
            let num_rows = produced.map(|res| res.num_rows);
            let query_time = elapsed.saturating_sub(decode_time.unwrap_or_default());
            let result = match &outcome {
                Ok(output) => Ok(output.summary()),
                Err(err) => Err(err.to_string()),
            };
            self.emitter.emit(&snapshot.finish(
                opts,
                result,
                num_rows,
                queue_time,
                Some(query_time),
                decode_time,
            ));
        }
        outcome
    }

    async fn run(
        &self,
        conn: &mut Conn<D>,
        call: Call<'_, D>,
    ) -> Result<CallOutput<D>, crate::error::DriverError> {
        let driver = &*self.driver;
        Ok(match call {
            Call::Prepare { name, sql } => CallOutput::Prepared(driver.prepare(conn, name, sql).await?),
            Call::Execute {
                statement, params, ..
            } => CallOutput::Result(driver.execute(conn, statement, params).await?),
            Call::PrepareExecute { name, sql, params } => {
                let (prepared, result) = driver.prepare_execute(conn, name, sql, params).await?;
                CallOutput::PreparedResult(prepared, result)
            }
            Call::Declare {
                statement,
                params,
                max_rows,
                ..
            } => CallOutput::Cursor(driver.declare(conn, statement, params, max_rows).await?),
            Call::Fetch { cursor, .. } => CallOutput::Batch(driver.fetch(conn, cursor).await?),
            Call::Deallocate { cursor, .. } => {
                driver.deallocate(conn, cursor).await?;
                CallOutput::Done
            }
            Call::Begin => {
                driver.begin(conn).await?;
                CallOutput::Done
            }
            Call::Commit => {
                driver.commit(conn).await?;
                CallOutput::Done
            }
            Call::Rollback => {
                driver.rollback(conn).await?;
                CallOutput::Done
            }
        })
    }

    /// Log a call that never reached the driver.
    fn log(
        &self,
        call: &Call<'_, D>,
        opts: &CallOptions,
        result: Result<(), &SqlEngineError>,
        queue_time: Option<Duration>,
        query_time: Option<Duration>,
        decode_time: Option<Duration>,
    ) {
        if !opts.log {
            return;
        }
        let result = result
            .map(|()| "ok".to_string())
            .map_err(ToString::to_string);
        self.emitter.emit(&LogSnapshot::of(call).finish(
            opts,
            result,
            None,
            queue_time,
            query_time,
            decode_time,
        ));
    }
}

/// The parts of a log entry known before the call runs.
struct LogSnapshot {
    call: CallKind,
    query: Option<Arc<str>>,
    params: Vec<RowValues>,
}

impl LogSnapshot {
    fn of<D: Driver>(call: &Call<'_, D>) -> Self {
        Self {
            call: call.kind(),
            query: call.sql().map(Arc::from),
            params: call.params().to_vec(),
        }
    }

    fn finish(
        self,
        opts: &CallOptions,
        result: Result<String, String>,
        num_rows: Option<usize>,
        queue_time: Option<Duration>,
        query_time: Option<Duration>,
        decode_time: Option<Duration>,
    ) -> LogEntry {
        LogEntry {
            call: self.call,
            query: self.query,
            params: self.params,
            result,
            num_rows,
            queue_time,
            query_time,
            decode_time,
            source: opts.source.clone(),
            caller: opts.caller.clone(),
        }
    }
}
