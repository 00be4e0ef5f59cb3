#![cfg(feature = "postgres")]

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sql_resilience::prelude::*;
use sql_resilience::test_utils::MemoryLog;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// e.g. TESTING_PG_URL="host=10.3.0.201 dbname=testing user=testuser"
fn live_url() -> Option<String> {
    env::var("TESTING_PG_URL").ok().filter(|s| !s.trim().is_empty())
}

/// A server that finishes the startup handshake and then never answers a
/// query. Returns its connection string and the number of sessions accepted.
async fn unresponsive_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut len = [0u8; 4];
                if socket.read_exact(&mut len).await.is_err() {
                    return;
                }
                let body = (u32::from_be_bytes(len) as usize).saturating_sub(4);
                let mut startup = vec![0u8; body];
                if socket.read_exact(&mut startup).await.is_err() {
                    return;
                }
                // AuthenticationOk, then ReadyForQuery (idle)
                let greeting = [b'R', 0, 0, 0, 8, 0, 0, 0, 0, b'Z', 0, 0, 0, 5, b'I'];
                if socket.write_all(&greeting).await.is_err() {
                    return;
                }
                let mut sink = [0u8; 1024];
                while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
            });
        }
    });
    (
        format!("host=127.0.0.1 port={port} user=svc dbname=app sslmode=disable"),
        accepted,
    )
}

#[tokio::test]
async fn hung_transaction_control_times_out_and_drops_the_session() {
    let (url, _) = unresponsive_server().await;
    let adapter = PostgresAdapter::new();
    let mut conn = adapter.create_connection(&url, None).await.unwrap();
    conn.set_command_timeout(Some(Duration::from_millis(100)));
    adapter.open(&mut conn).await.unwrap();
    assert!(adapter.is_open(&conn));

    let err = adapter.begin_transaction(&mut conn).await.unwrap_err();
    assert!(matches!(err, SqlResilienceError::CommandTimeout(_)));
    assert!(!adapter.is_open(&conn));

    adapter.open(&mut conn).await.unwrap();
    let err = adapter.commit(&mut conn).await.unwrap_err();
    assert!(matches!(err, SqlResilienceError::CommandTimeout(_)));
    assert!(!adapter.is_open(&conn));
}

#[tokio::test]
async fn derivation_timeouts_reconnect_before_the_next_attempt() {
    let (url, accepted) = unresponsive_server().await;
    let log = Arc::new(MemoryLog::new());
    let config = EngineConfig::new(1, 2, ExceptionActionMode::Rethrow).unwrap();
    let engine = Engine::new(PostgresAdapter::new(), config, log.clone());
    let mut conn = engine.create_connection(&url, None).await.unwrap();
    conn.set_command_timeout(Some(Duration::from_millis(100)));
    engine.adapter().open(&mut conn).await.unwrap();

    let err = engine
        .execute_basic_stored_procedure(
            (&mut conn).into(),
            &Request::procedure("public.close_order")
                .param("order_id", 1)
                .derive_parameters(),
        )
        .await
        .unwrap_err();

    let escalated = err.as_escalated().expect("escalated error");
    assert_eq!(
        escalated.kind(),
        EscalationKind::RetryBudgetExhausted { attempts: 2 }
    );
    // the timed-out session is dropped, so the second attempt dials again
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_server_is_escalated_as_unexpected() {
    let log = Arc::new(MemoryLog::new());
    let config = EngineConfig::new(1, 3, ExceptionActionMode::LogAndRethrow).unwrap();
    let engine = Engine::new(PostgresAdapter::new(), config, log.clone());

    let err = engine
        .execute_basic_query(
            ConnectionTarget::connection_string_with_timeout(
                "host=127.0.0.1 port=1 dbname=none user=none",
                Duration::from_secs(2),
            ),
            &Request::query("SELECT 1"),
        )
        .await
        .unwrap_err();

    let escalated = err.as_escalated().expect("escalated error");
    assert_eq!(escalated.kind(), EscalationKind::UnexpectedExecution);
    assert!(escalated.parameters().contains("[ServerName = 127.0.0.1] [DatabaseName = none] [User = none]"));
    assert_eq!(log.exceptions().len(), 1);
}

#[tokio::test]
async fn round_trip_against_a_live_server() -> Result<(), Box<dyn std::error::Error>> {
    let Some(url) = live_url() else {
        return Ok(());
    };
    let log = Arc::new(MemoryLog::new());
    let engine = Engine::new(PostgresAdapter::new(), EngineConfig::default(), log.clone());
    let mut conn = engine.create_connection(&url, None).await?;

    for ddl in [
        "DROP TABLE IF EXISTS resilience_accounts",
        "CREATE TABLE resilience_accounts (id INT PRIMARY KEY, name TEXT NOT NULL, balance NUMERIC(12, 2) NOT NULL)",
        "CREATE OR REPLACE PROCEDURE resilience_deposit(account_id INT, amount NUMERIC, OUT new_balance NUMERIC) \
         LANGUAGE plpgsql AS $$ BEGIN \
           UPDATE resilience_accounts SET balance = balance + amount WHERE id = account_id \
           RETURNING balance INTO new_balance; \
         END $$",
        "CREATE OR REPLACE FUNCTION resilience_count(min_balance NUMERIC) RETURNS INT \
         LANGUAGE sql AS $$ SELECT count(*)::int FROM resilience_accounts WHERE balance >= min_balance $$",
        "CREATE OR REPLACE FUNCTION resilience_accounts_named(prefix TEXT) \
         RETURNS TABLE (id INT, name TEXT) \
         LANGUAGE sql AS $$ SELECT id, name FROM resilience_accounts WHERE name LIKE prefix || '%' ORDER BY id $$",
    ] {
        engine
            .execute_basic_query((&mut conn).into(), &Request::query(ddl))
            .await?;
    }

    let inserted = engine
        .execute_basic_query(
            (&mut conn).into(),
            &Request::query("INSERT INTO resilience_accounts VALUES ($1, $2, 100), ($3, $4, 5)")
                .param("@a", 1)
                .param("@an", "ann")
                .param("@b", 2)
                .param("@bn", "anton"),
        )
        .await?;
    assert_eq!(inserted, 2);

    let count: i64 = engine
        .execute_scalar_query(
            (&mut conn).into(),
            &Request::query("SELECT count(*) AS cnt FROM resilience_accounts"),
            "cnt",
        )
        .await?;
    assert_eq!(count, 2);

    let balance: f64 = engine
        .execute_scalar_stored_procedure(
            (&mut conn).into(),
            &Request::procedure("resilience_deposit")
                .param("@account_id", 1)
                .param("@amount", 10.5)
                .derive_parameters()
                .simple_transaction(true),
            OutputTarget::named("new_balance"),
        )
        .await?;
    assert!((balance - 110.5).abs() < 1e-9);

    let rich: i32 = engine
        .execute_scalar_stored_procedure(
            (&mut conn).into(),
            &Request::procedure("resilience_count").param("@min_balance", 50),
            OutputTarget::return_value(),
        )
        .await?;
    assert_eq!(rich, 1);

    let names: Vec<String> = engine
        .execute_complex_stored_procedure(
            (&mut conn).into(),
            &Request::procedure("resilience_accounts_named").param("@prefix", "an"),
            |rows, _| {
                Ok(rows
                    .results
                    .iter()
                    .filter_map(|r| r.get("name").and_then(RowValues::as_text).map(str::to_string))
                    .collect())
            },
        )
        .await?;
    assert_eq!(names, vec!["ann", "anton"]);

    engine
        .execute_basic_query(
            (&mut conn).into(),
            &Request::query("DROP TABLE resilience_accounts"),
        )
        .await?;
    assert!(log.is_empty());
    Ok(())
}
