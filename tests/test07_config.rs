use std::collections::HashMap;

use sql_resilience::prelude::*;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn lookup_overrides_each_key() -> Result<(), SqlResilienceError> {
    let config = EngineConfig::from_lookup(
        "LEDGER",
        lookup(&[
            ("LEDGER_RETRY_MULTIPLY_VALUE", "250"),
            ("LEDGER_DB_TIMEOUT_RETRY_COUNT", " 5 "),
            ("LEDGER_EXCEPTION_ACTION_MODE", "log"),
        ]),
    )?;
    assert_eq!(config.retry_multiply_value(), 250);
    assert_eq!(config.max_retry_count(), 5);
    assert_eq!(config.exception_action_mode(), ExceptionActionMode::Log);
    Ok(())
}

#[test]
fn invalid_values_are_config_errors() {
    for pairs in [
        vec![("APP_RETRY_MULTIPLY_VALUE", "ten")],
        vec![("APP_RETRY_MULTIPLY_VALUE", "0")],
        vec![("APP_DB_TIMEOUT_RETRY_COUNT", "0")],
        vec![("APP_EXCEPTION_ACTION_MODE", "Ignore")],
        vec![
            ("APP_RETRY_MULTIPLY_VALUE", "4000000000"),
            ("APP_DB_TIMEOUT_RETRY_COUNT", "2"),
        ],
    ] {
        let result = EngineConfig::from_lookup("APP", lookup(&pairs));
        assert!(
            matches!(result, Err(SqlResilienceError::ConfigError(_))),
            "{pairs:?}"
        );
    }
}

#[test]
fn setters_keep_the_product_in_range() {
    let mut config = EngineConfig::default();
    assert!(config.set_max_retry_count(u32::MAX).is_err());
    assert_eq!(config.max_retry_count(), 3);
    config.set_retry_multiply_value(1).unwrap();
    config.set_max_retry_count(u32::MAX).unwrap();
    assert_eq!(config.max_retry_count(), u32::MAX);
}

#[test]
fn config_deserializes_with_validation() {
    let config: EngineConfig = serde_json::from_str(
        r#"{"retry_multiply_value": 50, "max_retry_count": 4, "exception_action_mode": "Rethrow"}"#,
    )
    .unwrap();
    assert_eq!(config.max_retry_count(), 4);
    assert_eq!(config.exception_action_mode(), ExceptionActionMode::Rethrow);

    let invalid = serde_json::from_str::<EngineConfig>(
        r#"{"retry_multiply_value": 0, "max_retry_count": 4, "exception_action_mode": "Log"}"#,
    );
    assert!(invalid.is_err());
}
