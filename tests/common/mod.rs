#![allow(dead_code)]

//! In-memory driver used by the integration tests. It records every operation together with the
//! id of the connection it ran on, and can be scripted to fail.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bb8::ManageConnection;
use sql_engine::driver::Statement;
use sql_engine::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub conn: u64,
    pub op: String,
}

#[derive(Default)]
pub struct MockState {
    events: Mutex<Vec<Event>>,
    scripted: Mutex<VecDeque<Result<QueryResult, DriverError>>>,
    last_params: Mutex<Vec<RowValues>>,
    generation: AtomicU64,
    next_conn: AtomicU64,
    pub stream_rows: AtomicUsize,
    execute_delay: Mutex<Option<Duration>>,
}

impl MockState {
    fn record(&self, conn: u64, op: impl Into<String>) {
        self.events.lock().unwrap().push(Event {
            conn,
            op: op.into(),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Operations in order, without connection ids and without pool connects.
    pub fn ops(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|e| e.op)
            .filter(|op| op != "connect")
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.ops().iter().filter(|op| op.starts_with(prefix)).count()
    }

    /// Connection ids the given operations ran on.
    pub fn conns_for(&self, prefix: &str) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter(|e| e.op.starts_with(prefix))
            .map(|e| e.conn)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Queue the outcome of the next execute.
    pub fn push(&self, outcome: Result<QueryResult, DriverError>) {
        self.scripted.lock().unwrap().push_back(outcome);
    }

    pub fn last_params(&self) -> Vec<RowValues> {
        self.last_params.lock().unwrap().clone()
    }

    /// Drop every preparation on every connection, as a server-side schema change would.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_stream_rows(&self, rows: usize) {
        self.stream_rows.store(rows, Ordering::SeqCst);
    }

    /// Make every execute sleep for `delay` before it records anything.
    pub fn set_execute_delay(&self, delay: Duration) {
        *self.execute_delay.lock().unwrap() = Some(delay);
    }
}

pub struct MockConn {
    id: u64,
    prepared: HashMap<String, u64>,
}

pub struct MockManager {
    state: Arc<MockState>,
}

impl ManageConnection for MockManager {
    type Connection = MockConn;
    type Error = DriverError;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            let id = state.next_conn.fetch_add(1, Ordering::SeqCst) + 1;
            state.record(id, "connect");
            Ok(MockConn {
                id,
                prepared: HashMap::new(),
            })
        }
    }

    fn is_valid(
        &self,
        _conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async { Ok(()) }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockPrepared {
    pub name: String,
}

pub struct MockCursor {
    rows: VecDeque<Vec<RowValues>>,
    max_rows: usize,
}

pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    fn check_prepared(&self, conn: &MockConn, name: &str) -> Result<(), DriverError> {
        let generation = self.state.generation.load(Ordering::SeqCst);
        match conn.prepared.get(name) {
            Some(g) if *g == generation => Ok(()),
            _ => Err(DriverError::reset(format!(
                "prepared statement \"{name}\" does not exist"
            ))),
        }
    }
}

fn echo(sql: &str, params: &[RowValues]) -> QueryResult {
    if sql.trim_start().to_uppercase().starts_with("SELECT") {
        let columns = (0..params.len()).map(|i| format!("c{i}")).collect();
        QueryResult::with_rows(Arc::new(columns), vec![params.to_vec()])
    } else {
        QueryResult::affected(1)
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Manager = MockManager;
    type Prepared = MockPrepared;
    type Cursor = MockCursor;

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn prepare(
        &self,
        conn: &mut MockConn,
        name: &str,
        _sql: &str,
    ) -> Result<MockPrepared, DriverError> {
        self.state.record(conn.id, format!("prepare {name}"));
        let generation = self.state.generation.load(Ordering::SeqCst);
        conn.prepared.insert(name.to_string(), generation);
        Ok(MockPrepared {
            name: name.to_string(),
        })
    }

    async fn execute(
        &self,
        conn: &mut MockConn,
        statement: Statement<'_, MockPrepared>,
        params: &[RowValues],
    ) -> Result<QueryResult, DriverError> {
        let delay = *self.state.execute_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let label = match statement {
            Statement::Text(sql) => sql.to_string(),
            Statement::Prepared { name, .. } => {
                self.check_prepared(conn, name)?;
                name.to_string()
            }
        };
        self.state.record(conn.id, format!("execute {label}"));
        *self.state.last_params.lock().unwrap() = params.to_vec();
        let scripted = self.state.scripted.lock().unwrap().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => Ok(echo(&label, params)),
        }
    }

    async fn declare(
        &self,
        conn: &mut MockConn,
        statement: Statement<'_, MockPrepared>,
        _params: &[RowValues],
        max_rows: usize,
    ) -> Result<MockCursor, DriverError> {
        if let Statement::Prepared { name, .. } = statement {
            self.check_prepared(conn, name)?;
        }
        self.state.record(conn.id, "declare");
        let total = self.state.stream_rows.load(Ordering::SeqCst);
        let rows = (0..total)
            .map(|i| vec![RowValues::Int(i64::try_from(i).unwrap())])
            .collect();
        Ok(MockCursor { rows, max_rows })
    }

    async fn fetch(
        &self,
        conn: &mut MockConn,
        cursor: &mut MockCursor,
    ) -> Result<Option<QueryResult>, DriverError> {
        self.state.record(conn.id, "fetch");
        if cursor.rows.is_empty() {
            return Ok(None);
        }
        let take = cursor.max_rows.min(cursor.rows.len());
        let batch = cursor.rows.drain(..take).collect();
        Ok(Some(QueryResult::with_rows(
            Arc::new(vec!["n".to_string()]),
            batch,
        )))
    }

    async fn deallocate(&self, conn: &mut MockConn, _cursor: MockCursor) -> Result<(), DriverError> {
        self.state.record(conn.id, "deallocate");
        Ok(())
    }

    async fn begin(&self, conn: &mut MockConn) -> Result<(), DriverError> {
        self.state.record(conn.id, "begin");
        Ok(())
    }

    async fn commit(&self, conn: &mut MockConn) -> Result<(), DriverError> {
        self.state.record(conn.id, "commit");
        Ok(())
    }

    async fn rollback(&self, conn: &mut MockConn) -> Result<(), DriverError> {
        self.state.record(conn.id, "rollback");
        Ok(())
    }

    fn classify_constraints(&self, err: &DriverError) -> Vec<Constraint> {
        match err.code.as_deref() {
            Some("23505") => vec![Constraint::new(ConstraintKind::Unique, err.message.clone())],
            _ => Vec::new(),
        }
    }
}

/// Log sink that keeps every entry.
#[derive(Default)]
pub struct CollectSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl CollectSink {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<CallKind> {
        self.entries().into_iter().map(|e| e.call).collect()
    }
}

impl LogSink for CollectSink {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

pub struct Harness {
    pub engine: SqlEngine<MockDriver>,
    pub state: Arc<MockState>,
    pub sink: Arc<CollectSink>,
}

pub async fn harness(config: EngineConfig) -> Harness {
    let state = Arc::new(MockState::default());
    let sink = Arc::new(CollectSink::default());
    let engine = SqlEngine::builder(
        MockDriver {
            state: Arc::clone(&state),
        },
        MockManager {
            state: Arc::clone(&state),
        },
    )
    .config(config)
    .log_sink(sink.clone())
    .build()
    .await
    .expect("mock engine builds");
    Harness {
        engine,
        state,
        sink,
    }
}

pub async fn default_harness() -> Harness {
    harness(EngineConfig::default()).await
}
