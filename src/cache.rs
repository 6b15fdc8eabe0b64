//! Prepared statement cache entries and the query intents built from them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_STATEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide statement id. Strictly increasing and never reused, so a reset for an old
/// generation can never invalidate a newer preparation of the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId(u64);

impl StatementId {
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_STATEMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Name the statement is prepared under on the server.
    #[must_use]
    pub fn name(self) -> String {
        format!("sqe_{}", self.0)
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SQL text produced by the query layer, tagged with its statement id.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    id: StatementId,
    sql: Arc<str>,
}

impl CompiledStatement {
    /// Assign a fresh id to `sql`.
    #[must_use]
    pub fn new(sql: impl Into<Arc<str>>) -> Self {
        Self {
            id: StatementId::next(),
            sql: sql.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> StatementId {
        self.id
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.id.name()
    }
}

/// A statement that has been prepared, with the driver's handle for it.
#[derive(Debug, Clone)]
pub struct CachedHandle<P> {
    pub statement: CompiledStatement,
    pub prepared: P,
}

pub type OnRefresh<P> = Box<dyn FnOnce(StatementId, P) + Send>;
pub type OnReset = Box<dyn FnOnce(StatementId, &str) + Send>;

/// How one logical statement flows through execute/stream.
pub enum QueryIntent<P> {
    /// First use: prepare and execute, then memoize into the engine's statement cache.
    Cache(CompiledStatement),
    /// First use with a caller-owned refresh callback.
    CacheUpdatable(CompiledStatement, OnRefresh<P>),
    /// Execute an already prepared handle; `OnReset` runs if the driver reports it invalid.
    CachedReadOnly(CachedHandle<P>, OnReset),
    /// Execute the SQL text with no caching side effects.
    NoCache(CompiledStatement),
}

impl<P> QueryIntent<P> {
    #[must_use]
    pub fn statement(&self) -> &CompiledStatement {
        match self {
            QueryIntent::Cache(stmt)
            | QueryIntent::CacheUpdatable(stmt, _)
            | QueryIntent::NoCache(stmt) => stmt,
            QueryIntent::CachedReadOnly(handle, _) => &handle.statement,
        }
    }

    /// Plain SQL text, no caching.
    #[must_use]
    pub fn no_cache(sql: impl Into<Arc<str>>) -> Self {
        QueryIntent::NoCache(CompiledStatement::new(sql))
    }
}

impl<P> fmt::Debug for QueryIntent<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            QueryIntent::Cache(_) => "Cache",
            QueryIntent::CacheUpdatable(..) => "CacheUpdatable",
            QueryIntent::CachedReadOnly(..) => "CachedReadOnly",
            QueryIntent::NoCache(_) => "NoCache",
        };
        f.debug_tuple(shape).field(self.statement()).finish()
    }
}

#[derive(Debug, Clone)]
pub enum CacheState<P> {
    Uncached,
    Prepared(P),
    Stale,
}

/// Handle-free view of a cache entry's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Uncached,
    Prepared,
    Stale,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<P> {
    pub id: StatementId,
    pub sql: Arc<str>,
    pub state: CacheState<P>,
}

struct CacheMap<P> {
    by_key: HashMap<String, CacheEntry<P>>,
    /// Every id ever issued for a key, retired generations included, so late callbacks for
    /// them resolve to the key and fail the id check instead of registering a new entry.
    by_id: HashMap<StatementId, String>,
}

/// Engine-lifetime map from query-layer cache keys to statement entries.
pub struct StatementCache<P> {
    inner: Mutex<CacheMap<P>>,
}

impl<P: Clone + Send + 'static> StatementCache<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheMap {
                by_key: HashMap::new(),
                by_id: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheMap<P>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // Entries are plain data; a panic mid-update leaves nothing half-written.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Build the intent for `key`: `Cache` while the key has no usable preparation (a stale
    /// entry gets a new id), `CachedReadOnly` once it is prepared.
    pub fn lookup(
        self: &Arc<Self>,
        key: &str,
        compile: impl FnOnce() -> String,
    ) -> QueryIntent<P> {
        let mut map = self.lock();
        let existing = map.by_key.get(key).map(|entry| {
            let statement = CompiledStatement {
                id: entry.id,
                sql: Arc::clone(&entry.sql),
            };
            (statement, entry.state.clone())
        });

        match existing {
            Some((statement, CacheState::Prepared(prepared))) => {
                let cache = Arc::clone(self);
                QueryIntent::CachedReadOnly(
                    CachedHandle {
                        statement,
                        prepared,
                    },
                    Box::new(move |id: StatementId, _sql: &str| cache.reset(id)),
                )
            }
            Some((statement, CacheState::Uncached)) => QueryIntent::Cache(statement),
            Some((old, CacheState::Stale)) => {
                let statement = CompiledStatement::new(Arc::clone(&old.sql));
                Self::insert(&mut map, key.to_string(), &statement);
                QueryIntent::Cache(statement)
            }
            None => {
                let statement = CompiledStatement::new(compile());
                Self::insert(&mut map, key.to_string(), &statement);
                QueryIntent::Cache(statement)
            }
        }
    }

    fn insert(map: &mut CacheMap<P>, key: String, statement: &CompiledStatement) {
        map.by_id.insert(statement.id, key.clone());
        map.by_key.insert(
            key,
            CacheEntry {
                id: statement.id,
                sql: Arc::clone(&statement.sql),
                state: CacheState::Uncached,
            },
        );
    }

    /// Memoize the prepared form of `statement`. Statements the cache has never seen are
    /// registered under their SQL text.
    pub fn refresh(&self, statement: &CompiledStatement, prepared: P) {
        let mut map = self.lock();
        let key = match map.by_id.get(&statement.id) {
            Some(key) => key.clone(),
            None => {
                let key = statement.sql().to_string();
                if map.by_key.get(&key).is_some_and(|e| e.id > statement.id) {
                    return;
                }
                Self::insert(&mut map, key.clone(), statement);
                key
            }
        };
        if let Some(entry) = map.by_key.get_mut(&key)
            && entry.id == statement.id
        {
            entry.state = CacheState::Prepared(prepared);
        }
    }

    /// Mark the entry holding `id` stale. Resets for an older generation are ignored.
    pub fn reset(&self, id: StatementId) {
        let mut map = self.lock();
        let Some(key) = map.by_id.get(&id).cloned() else {
            return;
        };
        if let Some(entry) = map.by_key.get_mut(&key)
            && entry.id == id
        {
            entry.state = CacheState::Stale;
        }
    }

    /// Drop the entry for `key`; the next lookup compiles it under a new id.
    pub fn invalidate(&self, key: &str) {
        self.lock().by_key.remove(key);
    }

    #[must_use]
    pub fn status(&self, key: &str) -> Option<(StatementId, CacheStatus)> {
        let map = self.lock();
        map.by_key.get(key).map(|entry| {
            let status = match entry.state {
                CacheState::Uncached => CacheStatus::Uncached,
                CacheState::Prepared(_) => CacheStatus::Prepared,
                CacheState::Stale => CacheStatus::Stale,
            };
            (entry.id, status)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: Clone + Send + 'static> Default for StatementCache<P> {
    fn default() -> Self {
        Self::new()
    }
}
