mod common;

use std::sync::Arc;

use common::default_harness;
use sql_engine::prelude::*;

fn insert_user() -> MutationRequest<common::MockPrepared> {
    MutationRequest::new(
        "users",
        QueryIntent::no_cache("INSERT INTO users (email) VALUES ($1) RETURNING id"),
        vec!["a@example.com".into()],
    )
    .returning(["id"])
}

#[tokio::test]
async fn insert_returns_the_requested_columns() -> Result<(), Box<dyn std::error::Error>> {
    let h = default_harness().await;
    h.state.push(Ok(QueryResult::with_rows(
        Arc::new(vec!["id".to_string()]),
        vec![vec![RowValues::Int(7)]],
    )));

    let outcome = h.engine.insert(insert_user(), &QueryOptions::new()).await?;
    assert_eq!(
        outcome,
        MutationOutcome::Applied(vec![("id".to_string(), RowValues::Int(7))])
    );
    assert_eq!(outcome.returned("id"), Some(&RowValues::Int(7)));
    Ok(())
}

#[tokio::test]
async fn unique_violations_come_back_invalid() -> Result<(), Box<dyn std::error::Error>> {
    let h = default_harness().await;
    h.state
        .push(Err(DriverError::other("users_email_index").with_code("23505")));

    let outcome = h.engine.insert(insert_user(), &QueryOptions::new()).await?;
    assert_eq!(
        outcome,
        MutationOutcome::Invalid(vec![Constraint::new(
            ConstraintKind::Unique,
            "users_email_index"
        )])
    );
    Ok(())
}

#[tokio::test]
async fn unclassified_failures_propagate() {
    let h = default_harness().await;
    h.state.push(Err(DriverError::other("disk full")));

    let res = h.engine.insert(insert_user(), &QueryOptions::new()).await;
    assert!(matches!(res, Err(SqlEngineError::Driver(err)) if err.message == "disk full"));
}

#[tokio::test]
async fn conflict_nothing_tolerates_zero_rows() -> Result<(), Box<dyn std::error::Error>> {
    let h = default_harness().await;
    h.state.push(Ok(QueryResult::affected(0)));

    let request = insert_user().on_conflict(OnConflict::Nothing, vec![]);
    let outcome = h.engine.insert(request, &QueryOptions::new()).await?;
    assert_eq!(outcome, MutationOutcome::Applied(vec![]));
    Ok(())
}

#[tokio::test]
async fn conflict_params_follow_the_row_params() -> Result<(), Box<dyn std::error::Error>> {
    let h = default_harness().await;
    h.state.push(Ok(QueryResult::affected(1)));

    let request = MutationRequest::new(
        "users",
        QueryIntent::no_cache(
            "INSERT INTO users (email, name) VALUES ($1, $2) \
             ON CONFLICT (email) DO UPDATE SET name = $3",
        ),
        vec!["a@example.com".into(), "Ann".into()],
    )
    .on_conflict(OnConflict::Replace(vec!["name".into()]), vec!["Ann".into()]);
    let outcome = h.engine.insert(request, &QueryOptions::new()).await?;

    assert!(outcome.is_applied());
    assert_eq!(
        h.state.last_params(),
        vec![
            RowValues::from("a@example.com"),
            RowValues::from("Ann"),
            RowValues::from("Ann"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn update_of_a_missing_row_is_stale() -> Result<(), Box<dyn std::error::Error>> {
    let h = default_harness().await;
    h.state.push(Ok(QueryResult::affected(0)));

    let request = MutationRequest::new(
        "users",
        QueryIntent::no_cache("UPDATE users SET name = $1 WHERE id = $2"),
        vec!["Bea".into(), RowValues::Int(99)],
    )
    // Update ignores the conflict policy.
    .on_conflict(OnConflict::Nothing, vec![]);
    let outcome = h.engine.update(request, &QueryOptions::new()).await?;
    assert_eq!(outcome, MutationOutcome::Stale);
    Ok(())
}

#[tokio::test]
async fn delete_matching_many_rows_fails() {
    let h = default_harness().await;
    h.state.push(Ok(QueryResult::affected(2)));

    let request = MutationRequest::new(
        "users",
        QueryIntent::no_cache("DELETE FROM users WHERE org = $1"),
        vec![RowValues::Int(3)],
    );
    let res = h.engine.delete(request, &QueryOptions::new()).await;
    match res {
        Err(SqlEngineError::MultipleRows {
            origin,
            params,
            count,
        }) => {
            assert_eq!(origin, "users");
            assert_eq!(params, vec![RowValues::Int(3)]);
            assert_eq!(count, 2);
        }
        other => panic!("expected a multiplicity error, got {other:?}"),
    }
}

#[tokio::test]
async fn mutations_are_logged_with_their_source() -> Result<(), Box<dyn std::error::Error>> {
    let h = default_harness().await;
    h.engine.insert(insert_user(), &QueryOptions::new()).await?;
    h.engine
        .insert(insert_user(), &QueryOptions::new().source("accounts"))
        .await?;

    let sources: Vec<_> = h.sink.entries().into_iter().map(|e| e.source).collect();
    assert_eq!(
        sources,
        vec![Some("users".to_string()), Some("accounts".to_string())]
    );
    Ok(())
}
