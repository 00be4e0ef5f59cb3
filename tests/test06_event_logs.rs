use std::sync::Arc;

use sql_resilience::prelude::*;
use sql_resilience::test_utils::{MemoryLog, StubAdapter, StubConnection, StubResponse};

#[tokio::test(start_paused = true)]
async fn file_log_receives_retries_and_escalations() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sql.log");
    let file_log = Arc::new(FileLog::create(&path)?);

    let stub = StubAdapter::new();
    stub.set_fallback(StubResponse::timeout());
    let config = EngineConfig::new(5, 2, ExceptionActionMode::Log)?;
    let engine = Engine::new(stub.clone(), config, file_log);
    let mut conn = StubConnection::opened("Server=db01");

    let affected = engine
        .execute_basic_query((&mut conn).into(), &Request::query("UPDATE t SET x = 1"))
        .await?;
    assert_eq!(affected, 0);

    let contents = std::fs::read_to_string(&path)?;
    let headers: Vec<&str> = contents
        .lines()
        .filter(|l| l.contains("[ExecuteBasicQuery]"))
        .collect();
    assert_eq!(headers.len(), 2);
    assert!(headers[0].contains("Info [ExecuteBasicQuery] Timeout exception occurred."));
    assert!(headers[1].contains("Error [ExecuteBasicQuery] Exception occurred. Maximum attempts (2) completed."));
    assert!(contents.contains("    Caused by: Timeout expired."));
    Ok(())
}

#[tokio::test]
async fn queued_log_delivers_in_order_after_drain() -> Result<(), SqlResilienceError> {
    let memory = Arc::new(MemoryLog::new());
    let queue = Arc::new(QueuedLog::spawn(memory.clone(), 16)?);

    let stub = StubAdapter::new();
    stub.push_response(StubResponse::error("first"))
        .push_response(StubResponse::error("second"));
    let config = EngineConfig::default().with_exception_action_mode(ExceptionActionMode::Log);
    let engine = Engine::new(stub, config, queue.clone());
    let mut conn = StubConnection::opened("Server=db01");

    for _ in 0..2 {
        engine
            .execute_basic_query((&mut conn).into(), &Request::query("DELETE FROM t"))
            .await?;
    }
    queue.drain().await?;

    let entries = memory.exceptions();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].text.ends_with("Cause: SQL execution error: first"));
    assert!(entries[1].text.ends_with("Cause: SQL execution error: second"));
    assert_eq!(queue.dropped(), 0);

    queue.shutdown().await?;
    Ok(())
}

#[test]
fn queued_log_rejects_zero_capacity() {
    let memory = Arc::new(MemoryLog::new());
    assert!(matches!(
        QueuedLog::spawn(memory, 0),
        Err(SqlResilienceError::ConfigError(_))
    ));
}
