use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use sql_resilience::prelude::*;
use sql_resilience::test_utils::{MemoryLog, StubAdapter, StubConnection, StubResponse};

fn engine(log: Arc<MemoryLog>) -> (Engine<StubAdapter>, StubAdapter) {
    let stub = StubAdapter::new();
    let config = EngineConfig::new(10, 3, ExceptionActionMode::LogAndRethrow).unwrap();
    (Engine::new(stub.clone(), config, log), stub)
}

#[tokio::test]
async fn null_input_of_any_type_is_rejected_before_execution() -> Result<(), Box<dyn std::error::Error>> {
    let nulls: Vec<RowValues> = vec![
        None::<i64>.into(),
        None::<f64>.into(),
        None::<String>.into(),
        None::<bool>.into(),
        None::<chrono::NaiveDateTime>.into(),
        None::<serde_json::Value>.into(),
        None::<Vec<u8>>.into(),
    ];
    for null in nulls {
        let log = Arc::new(MemoryLog::new());
        let (engine, stub) = engine(log.clone());
        let mut conn = StubConnection::new("Server=db01");
        let request = Request::query("UPDATE t SET x = @x WHERE id = @id")
            .param("@id", 1)
            .param("@x", null);

        let err = engine
            .execute_basic_query((&mut conn).into(), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, SqlResilienceError::InvalidParameter(_)), "{err}");
        assert!(stub.executions().is_empty());
        assert_eq!(stub.opens(), 0);
        // the binder logs the attempted pairs; no escalation follows
        assert_eq!(log.exceptions().len(), 1);
        assert_eq!(log.exceptions()[0].context, vec!["@id = 1", "@x = NULL"]);
    }
    Ok(())
}

#[tokio::test]
async fn values_are_formatted_for_the_wire() -> Result<(), Box<dyn std::error::Error>> {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log.clone());
    let mut conn = StubConnection::opened("Server=db01");
    let when = NaiveDate::from_ymd_opt(2024, 1, 2)
        .and_then(|d| d.and_hms_opt(3, 4, 5))
        .ok_or("bad date")?;
    let request = Request::query("INSERT INTO t VALUES (@a, @b, @c, @d, @e)")
        .param("@a", true)
        .param("@b", false)
        .param("@c", "")
        .param("@d", when)
        .param("@e", json!({"k": 1}));
    stub.push_response(StubResponse::affected(1));

    let count = engine
        .execute_basic_query((&mut conn).into(), &request)
        .await?;
    assert_eq!(count, 1);

    let executed = &stub.executions()[0];
    let values: Vec<&RowValues> = executed.parameters.iter().map(|p| &p.value).collect();
    assert_eq!(
        values,
        vec![
            &RowValues::Int(1),
            &RowValues::Int(0),
            &RowValues::Text(String::new()),
            &RowValues::Timestamp(when),
            &RowValues::JSON(json!({"k": 1})),
        ]
    );
    assert!(executed
        .parameters
        .iter()
        .all(|p| p.direction == ParameterDirection::Input));
    assert!(log.is_empty());
    Ok(())
}

#[tokio::test]
async fn outputs_and_return_slot_are_bound_after_inputs() -> Result<(), Box<dyn std::error::Error>> {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log);
    let mut conn = StubConnection::opened("Server=db01");
    let request = Request::procedure("dbo.Transfer")
        .param("@From", 1)
        .param("@Amount", 12.5)
        .out_param("@Amount", SqlType::Decimal, None)
        .out_param("@Message", SqlType::NVarChar, Some(200))
        .return_value(SqlType::Int, None);

    engine
        .execute_basic_stored_procedure((&mut conn).into(), &request)
        .await?;

    let executed = &stub.executions()[0];
    let shape: Vec<(&str, ParameterDirection)> = executed
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), p.direction))
        .collect();
    assert_eq!(
        shape,
        vec![
            ("@RETURN_VALUE", ParameterDirection::ReturnValue),
            ("@From", ParameterDirection::Input),
            ("@Amount", ParameterDirection::InputOutput),
            ("@Message", ParameterDirection::Output),
        ]
    );
    assert_eq!(executed.parameters[3].size, Some(200));
    Ok(())
}

#[tokio::test]
async fn return_value_on_text_command_fails_before_any_driver_call() {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log.clone());
    let mut conn = StubConnection::new("Server=db01");
    let request = Request::query("SELECT 1 AS one").return_value(SqlType::Int, None);

    let err = engine
        .execute_scalar_query::<i64>((&mut conn).into(), &request, "one")
        .await
        .unwrap_err();
    assert!(matches!(err, SqlResilienceError::InvalidCommandShape(_)));
    assert!(stub.events().is_empty());
    assert!(log.is_empty());
}

#[tokio::test]
async fn call_shape_must_match_command_kind() {
    let log = Arc::new(MemoryLog::new());
    let (engine, stub) = engine(log);
    let mut conn = StubConnection::opened("Server=db01");

    let err = engine
        .execute_basic_stored_procedure((&mut conn).into(), &Request::query("DELETE FROM t"))
        .await
        .unwrap_err();
    assert!(matches!(err, SqlResilienceError::InvalidCommandShape(_)));

    let err = engine
        .execute_basic_query((&mut conn).into(), &Request::procedure("dbo.Purge"))
        .await
        .unwrap_err();
    assert!(matches!(err, SqlResilienceError::InvalidCommandShape(_)));
    assert!(stub.executions().is_empty());
}
