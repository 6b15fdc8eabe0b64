//! Task-scoped association between a pool and the connection a transaction checked out.
//!
//! The map lives in a `tokio` task-local entered by the outermost transaction, so nested calls
//! in the same task resolve the same connection while spawned tasks never see it.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bb8::PooledConnection;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, MutexGuard};

use crate::driver::Driver;
use crate::error::SqlEngineError;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one engine's pool; the binding key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl PoolId {
    pub(crate) fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of one binding scope (one task's outermost transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContextId(u64);

struct Bindings {
    context: ContextId,
    by_pool: HashMap<PoolId, Arc<dyn Any + Send + Sync>>,
}

tokio::task_local! {
    static BINDINGS: RefCell<Bindings>;
}

pub(crate) type Leased<D> = PooledConnection<'static, <D as Driver>::Manager>;

/// A leased connection pinned to one execution context.
pub(crate) struct BoundConnection<D: Driver> {
    conn: Mutex<Option<Leased<D>>>,
    context: ContextId,
    closed: AtomicBool,
    rollback_only: AtomicBool,
}

impl<D: Driver> BoundConnection<D> {
    pub(crate) fn context(&self) -> ContextId {
        self.context
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::Release);
    }

    pub(crate) fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::Acquire)
    }

    /// Lock the connection for one driver call.
    ///
    /// # Errors
    /// `SqlEngineError::StreamClosed` once the owning transaction released it.
    pub(crate) async fn lock(&self) -> Result<MutexGuard<'_, Option<Leased<D>>>, SqlEngineError> {
        let guard = self.conn.lock().await;
        if guard.is_none() || self.is_closed() {
            return Err(SqlEngineError::StreamClosed);
        }
        Ok(guard)
    }

    async fn take(&self) -> Option<Leased<D>> {
        self.closed.store(true, Ordering::Release);
        self.conn.lock().await.take()
    }
}

/// Context id of the current task's binding scope, if one is active.
pub(crate) fn current_context() -> Option<ContextId> {
    BINDINGS.try_with(|b| b.borrow().context).ok()
}

/// Connection bound to `pool` in the current task.
pub(crate) fn lookup<D: Driver>(pool: PoolId) -> Option<Arc<BoundConnection<D>>> {
    let any = BINDINGS
        .try_with(|b| b.borrow().by_pool.get(&pool).cloned())
        .ok()
        .flatten()?;
    any.downcast::<BoundConnection<D>>().ok()
}

pub(crate) fn is_bound(pool: PoolId) -> bool {
    BINDINGS
        .try_with(|b| b.borrow().by_pool.contains_key(&pool))
        .unwrap_or(false)
}

/// Run `fut` inside a binding scope, entering a fresh one only if the task has none.
pub(crate) async fn scope<F: Future>(fut: F) -> F::Output {
    if current_context().is_some() {
        return fut.await;
    }
    let bindings = Bindings {
        context: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
        by_pool: HashMap::new(),
    };
    BINDINGS.scope(RefCell::new(bindings), fut).await
}

/// Pin `conn` to `pool` for the current scope. Must be called inside [`scope`].
pub(crate) fn bind<D: Driver>(
    pool: PoolId,
    driver: Arc<D>,
    conn: Leased<D>,
) -> Result<BindingGuard<D>, SqlEngineError> {
    let inserted = BINDINGS.try_with(|b| {
        let mut b = b.borrow_mut();
        let bound = Arc::new(BoundConnection::<D> {
            conn: Mutex::new(Some(conn)),
            context: b.context,
            closed: AtomicBool::new(false),
            rollback_only: AtomicBool::new(false),
        });
        b.by_pool
            .insert(pool, Arc::clone(&bound) as Arc<dyn Any + Send + Sync>);
        bound
    });
    match inserted {
        Ok(bound) => {
            tracing::trace!(target: "sql_engine::binding", ?pool, "connection bound");
            Ok(BindingGuard {
                pool,
                driver,
                bound,
                released: false,
            })
        }
        Err(_) => Err(SqlEngineError::Execution(
            "no binding scope is active for this task".to_string(),
        )),
    }
}

/// Removes the binding on every exit path. A guard dropped without [`BindingGuard::release`]
/// (the transaction future was cancelled) rolls the connection back before it returns to the
/// pool.
pub(crate) struct BindingGuard<D: Driver> {
    pool: PoolId,
    driver: Arc<D>,
    bound: Arc<BoundConnection<D>>,
    released: bool,
}

impl<D: Driver> BindingGuard<D> {
    pub(crate) fn bound(&self) -> &Arc<BoundConnection<D>> {
        &self.bound
    }

    fn unbind(&self) {
        let _ = BINDINGS.try_with(|b| b.borrow_mut().by_pool.remove(&self.pool));
    }

    /// Unbind and hand the connection back to the pool.
    pub(crate) async fn release(mut self) {
        self.unbind();
        drop(self.bound.take().await);
        self.released = true;
        tracing::trace!(target: "sql_engine::binding", pool = ?self.pool, "connection released");
    }
}

impl<D: Driver> Drop for BindingGuard<D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.unbind();
        self.bound.closed.store(true, Ordering::Release);
        let Ok(mut slot) = self.bound.conn.try_lock() else {
            return;
        };
        if let Some(mut conn) = slot.take()
            && let Ok(handle) = Handle::try_current()
        {
            let driver = Arc::clone(&self.driver);
            handle.spawn(async move {
                if let Err(err) = driver.rollback(&mut *conn).await {
                    tracing::warn!(target: "sql_engine::binding", %err, "rollback after cancellation failed");
                }
            });
        }
    }
}
