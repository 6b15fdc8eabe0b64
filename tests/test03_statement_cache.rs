mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Harness, harness};
use sql_engine::cache::{CacheStatus, CachedHandle};
use sql_engine::prelude::*;

const KEY: &str = "users/by_id";

// A single pooled connection keeps every call on the connection that holds the preparation.
async fn single_connection() -> Harness {
    harness(EngineConfig::builder().pool_size(1).finish()).await
}

fn compile() -> String {
    "SELECT * FROM users WHERE id = $1".to_string()
}

#[tokio::test]
async fn first_use_prepares_then_reuses() -> Result<(), Box<dyn std::error::Error>> {
    let h = single_connection().await;
    let opts = QueryOptions::new();
    let params = [RowValues::Int(1)];

    h.engine.query_cached(KEY, compile, &params, &opts).await?;
    let (id, status) = h.engine.statements().status(KEY).unwrap();
    assert_eq!(status, CacheStatus::Prepared);
    let name = id.name();
    assert_eq!(
        h.state.ops(),
        vec![format!("prepare {name}"), format!("execute {name}")]
    );

    h.state.clear();
    let compiled_again = AtomicUsize::new(0);
    h.engine
        .query_cached(
            KEY,
            || {
                compiled_again.fetch_add(1, Ordering::SeqCst);
                compile()
            },
            &params,
            &opts,
        )
        .await?;
    assert_eq!(h.state.ops(), vec![format!("execute {name}")]);
    assert_eq!(compiled_again.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn reset_marks_stale_and_next_call_reprepares() -> Result<(), Box<dyn std::error::Error>> {
    let h = single_connection().await;
    let opts = QueryOptions::new();
    let params = [RowValues::Int(1)];

    h.engine.query_cached(KEY, compile, &params, &opts).await?;
    let (first_id, _) = h.engine.statements().status(KEY).unwrap();

    h.state.invalidate_all();
    let err = h
        .engine
        .query_cached(KEY, compile, &params, &opts)
        .await
        .unwrap_err();
    match &err {
        SqlEngineError::Reset { name, source } => {
            assert_eq!(name, &first_id.name());
            assert_eq!(source.kind, DriverErrorKind::Reset);
        }
        other => panic!("expected a reset, got {other:?}"),
    }
    assert_eq!(
        h.engine.statements().status(KEY),
        Some((first_id, CacheStatus::Stale))
    );

    h.state.clear();
    h.engine.query_cached(KEY, compile, &params, &opts).await?;
    let (second_id, status) = h.engine.statements().status(KEY).unwrap();
    assert!(second_id > first_id);
    assert_eq!(status, CacheStatus::Prepared);
    assert_eq!(h.state.count("prepare"), 1);
    Ok(())
}

#[tokio::test]
async fn read_only_intent_runs_reset_callback_once() -> Result<(), Box<dyn std::error::Error>> {
    let h = single_connection().await;
    let opts = QueryOptions::new();
    let statement = CompiledStatement::new("SELECT 1");
    let prepared = h.engine.prepare(&statement, &opts).await?;

    let resets = Arc::new(AtomicUsize::new(0));
    let handle = CachedHandle {
        statement: statement.clone(),
        prepared,
    };

    let counter = Arc::clone(&resets);
    let intent = QueryIntent::CachedReadOnly(
        handle.clone(),
        Box::new(move |id: StatementId, sql: &str| {
            assert_eq!(sql, "SELECT 1");
            assert_eq!(id.name(), statement.name());
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    h.engine.execute(intent, &[], &opts).await?;
    assert_eq!(resets.load(Ordering::SeqCst), 0);

    h.state.invalidate_all();
    let counter = Arc::clone(&resets);
    let intent = QueryIntent::CachedReadOnly(
        handle,
        Box::new(move |_: StatementId, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let res = h.engine.execute(intent, &[], &opts).await;
    assert!(matches!(res, Err(SqlEngineError::Reset { .. })));
    assert_eq!(resets.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn updatable_intent_hands_back_the_prepared_handle() -> Result<(), Box<dyn std::error::Error>>
{
    let h = single_connection().await;
    let statement = CompiledStatement::new("SELECT 2");
    let expected = statement.id();

    let (tx, rx) = std::sync::mpsc::channel();
    let intent = QueryIntent::CacheUpdatable(
        statement,
        Box::new(move |id: StatementId, prepared| {
            let _ = tx.send((id, prepared));
        }),
    );
    h.engine.execute(intent, &[], &QueryOptions::new()).await?;

    let (id, prepared) = rx.try_recv()?;
    assert_eq!(id, expected);
    assert_eq!(prepared.name, expected.name());
    assert!(h.engine.statements().is_empty());
    Ok(())
}

#[tokio::test]
async fn uncached_queries_leave_the_cache_alone() -> Result<(), Box<dyn std::error::Error>> {
    let h = single_connection().await;
    let res = h
        .engine
        .query("SELECT $1", &[RowValues::Int(5)], &QueryOptions::new())
        .await?;
    assert_eq!(res.rows(), &[vec![RowValues::Int(5)]]);
    assert!(h.engine.statements().is_empty());
    assert_eq!(h.state.count("prepare"), 0);
    Ok(())
}

#[tokio::test]
async fn prepare_memoizes_under_the_sql_text() -> Result<(), Box<dyn std::error::Error>> {
    let h = single_connection().await;
    let statement = CompiledStatement::new("SELECT 3");
    h.engine.prepare(&statement, &QueryOptions::new()).await?;

    assert_eq!(
        h.engine.statements().status("SELECT 3"),
        Some((statement.id(), CacheStatus::Prepared))
    );
    let intent = h.engine.statements().lookup("SELECT 3", || unreachable!());
    assert!(matches!(intent, QueryIntent::CachedReadOnly(..)));
    Ok(())
}
