use std::sync::Arc;

use chrono::NaiveDate;
use sql_resilience::prelude::*;
use sql_resilience::test_utils::{MemoryLog, StubAdapter, StubConnection, StubResponse};

fn engine(log: Arc<MemoryLog>) -> (Engine<StubAdapter>, StubAdapter) {
    let stub = StubAdapter::new();
    (Engine::new(stub.clone(), EngineConfig::default(), log), stub)
}

#[tokio::test]
async fn count_query_returns_the_scalar_without_logging() -> Result<(), SqlResilienceError> {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log.clone());
    stub.push_response(StubResponse::rows(&["cnt"], vec![vec![RowValues::Int(7)]]));
    let mut conn = StubConnection::opened("Server=db01");

    let count: i64 = engine
        .execute_scalar_query((&mut conn).into(), &Request::query("Select count(*) from T"), "cnt")
        .await?;

    assert_eq!(count, 7);
    assert!(log.is_empty());
    assert_eq!(stub.executions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn null_and_missing_rows_coerce_to_defaults() -> Result<(), SqlResilienceError> {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log);
    stub.push_response(StubResponse::rows(&["name"], vec![vec![RowValues::Null]]))
        .push_response(StubResponse::rows(&["total"], vec![]))
        .push_response(StubResponse::rows(&["flag"], vec![vec![RowValues::Null]]));
    let mut conn = StubConnection::opened("Server=db01");

    let name: String = engine
        .execute_scalar_query((&mut conn).into(), &Request::query("SELECT name FROM t"), "name")
        .await?;
    assert_eq!(name, "");

    let total: f64 = engine
        .execute_scalar_query((&mut conn).into(), &Request::query("SELECT total FROM t"), "total")
        .await?;
    assert_eq!(total, 0.0);

    let flag: Option<bool> = engine
        .execute_scalar_query((&mut conn).into(), &Request::query("SELECT flag FROM t"), "flag")
        .await?;
    assert_eq!(flag, None);
    Ok(())
}

#[tokio::test]
async fn column_lookup_ignores_case() -> Result<(), SqlResilienceError> {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log);
    stub.push_response(StubResponse::rows(&["CreatedAt"], vec![vec![RowValues::Text(
        "05-MAR-24 02.15.30.000000 PM".into(),
    )]]));
    let mut conn = StubConnection::opened("Server=db01");

    // the adapter's override turns the vendor text into a timestamp
    let created: chrono::NaiveDateTime = engine
        .execute_scalar_query((&mut conn).into(), &Request::query("SELECT created_at FROM t"), "createdat")
        .await?;
    let expected = NaiveDate::from_ymd_opt(2024, 3, 5).and_then(|d| d.and_hms_opt(14, 15, 30));
    assert_eq!(Some(created), expected);
    Ok(())
}

#[tokio::test]
async fn complex_query_hands_over_the_whole_result_set() -> Result<(), SqlResilienceError> {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log);
    stub.push_response(StubResponse::rows(
        &["id", "name"],
        vec![
            vec![RowValues::Int(1), RowValues::Text("ann".into())],
            vec![RowValues::Int(2), RowValues::Text("bob".into())],
        ],
    ));
    let mut conn = StubConnection::opened("Server=db01");

    let people: Vec<(i64, String)> = engine
        .execute_complex_query((&mut conn).into(), &Request::query("SELECT id, name FROM people"), |rows| {
            rows.results
                .iter()
                .map(|row| {
                    let id = row.get("id").and_then(RowValues::as_int).copied().unwrap_or_default();
                    let name = row.get("name").and_then(RowValues::as_text).unwrap_or_default();
                    Ok((id, name.to_string()))
                })
                .collect()
        })
        .await?;

    assert_eq!(people, vec![(1, "ann".to_string()), (2, "bob".to_string())]);
    Ok(())
}

#[tokio::test]
async fn connection_string_targets_get_a_fresh_closed_connection() -> Result<(), SqlResilienceError> {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log);
    stub.push_response(StubResponse::affected(3));

    let affected = engine
        .execute_basic_query(
            ConnectionTarget::connection_string_with_timeout(
                "Server=db01; Database=app",
                std::time::Duration::from_secs(5),
            ),
            &Request::query("UPDATE t SET x = 1"),
        )
        .await?;

    assert_eq!(affected, 3);
    assert_eq!(stub.opens(), 1);
    assert_eq!(stub.closes(), 1);
    Ok(())
}

#[tokio::test]
async fn connection_failures_surface_without_retry() {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log);
    stub.fail_connect("login failed for user 'svc'");

    let err = engine
        .execute_basic_query(
            ConnectionTarget::connection_string("Server=db01"),
            &Request::query("UPDATE t SET x = 1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SqlResilienceError::ConnectionError(_)));
    assert!(stub.executions().is_empty());
}
