//! Per-call log entries and the sinks that consume them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::types::RowValues;

/// Driver operation a log entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Prepare,
    Execute,
    PrepareExecute,
    Declare,
    Fetch,
    Deallocate,
    Begin,
    Commit,
    Rollback,
}

impl CallKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Prepare => "prepare",
            CallKind::Execute => "execute",
            CallKind::PrepareExecute => "prepare_execute",
            CallKind::Declare => "declare",
            CallKind::Fetch => "fetch",
            CallKind::Deallocate => "deallocate",
            CallKind::Begin => "begin",
            CallKind::Commit => "commit",
            CallKind::Rollback => "rollback",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one dispatched call.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub call: CallKind,
    pub query: Option<Arc<str>>,
    pub params: Vec<RowValues>,
    /// Result summary, or the error message.
    pub result: Result<String, String>,
    /// Rows returned or affected, when the call produced a result.
    pub num_rows: Option<usize>,
    /// Time spent waiting for a pool checkout; `None` on a bound connection.
    pub queue_time: Option<Duration>,
    pub query_time: Option<Duration>,
    pub decode_time: Option<Duration>,
    pub source: Option<String>,
    pub caller: Option<String>,
}

impl LogEntry {
    /// Wall time attributed to the call.
    #[must_use]
    pub fn total_time(&self) -> Duration {
        [self.queue_time, self.query_time, self.decode_time]
            .into_iter()
            .flatten()
            .sum()
    }
}

/// Consumer of log entries. Sinks are observational only and cannot fail the call.
pub trait LogSink: Send + Sync {
    fn log(&self, entry: &LogEntry);
}

/// Default sink: one `tracing` event per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

fn millis(d: Option<Duration>) -> f64 {
    d.map_or(0.0, |d| d.as_secs_f64() * 1_000.0)
}

impl LogSink for TracingSink {
    fn log(&self, entry: &LogEntry) {
        let query = entry.query.as_deref().unwrap_or("");
        let source = entry.source.as_deref().unwrap_or("");
        let caller = entry.caller.as_deref().unwrap_or("");
        match &entry.result {
            Ok(summary) => tracing::debug!(
                target: "sql_engine::query",
                call = entry.call.as_str(),
                query,
                params = ?entry.params,
                source,
                caller,
                queue_ms = millis(entry.queue_time),
                query_ms = millis(entry.query_time),
                decode_ms = millis(entry.decode_time),
                num_rows = entry.num_rows.and_then(|n| u64::try_from(n).ok()),
                "{summary}"
            ),
            Err(error) => tracing::warn!(
                target: "sql_engine::query",
                call = entry.call.as_str(),
                query,
                params = ?entry.params,
                source,
                caller,
                queue_ms = millis(entry.queue_time),
                query_ms = millis(entry.query_time),
                error = %error,
                "query failed"
            ),
        }
    }
}

/// Fan-out to the configured sinks.
#[derive(Clone)]
pub(crate) struct Emitter {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl Emitter {
    pub(crate) fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }

    pub(crate) fn emit(&self, entry: &LogEntry) {
        for sink in &self.sinks {
            sink.log(entry);
        }
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<CallKind>>);

    impl LogSink for Collect {
        fn log(&self, entry: &LogEntry) {
            self.0.lock().unwrap().push(entry.call);
        }
    }

    #[test]
    fn emitter_fans_out_to_every_sink() {
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        let sinks: Vec<Arc<dyn LogSink>> = vec![a.clone(), b.clone(), Arc::new(TracingSink)];
        let emitter = Emitter::new(sinks);
        let entry = LogEntry {
            call: CallKind::Execute,
            query: Some(Arc::from("SELECT 1")),
            params: vec![],
            result: Ok("1 row(s), 1 column(s)".into()),
            num_rows: Some(1),
            queue_time: Some(Duration::from_millis(2)),
            query_time: Some(Duration::from_millis(3)),
            decode_time: None,
            source: None,
            caller: None,
        };
        emitter.emit(&entry);
        assert_eq!(*a.0.lock().unwrap(), vec![CallKind::Execute]);
        assert_eq!(*b.0.lock().unwrap(), vec![CallKind::Execute]);
        assert_eq!(entry.total_time(), Duration::from_millis(5));
    }
}
