//! Engine configuration: backoff multiplier, retry budget and action mode.

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SqlResilienceError;

pub const DEFAULT_RETRY_MULTIPLY_VALUE: u32 = 10_000;
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;

/// What happens to a call that has given up.
///
/// Under `Log` a failed call returns the result type's `Default` value and no
/// error; callers that cannot tell a real zero from a failure must not use it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum ExceptionActionMode {
    /// Return the composite error without logging it.
    Rethrow,
    /// Log the composite error and return the default value.
    Log,
    /// Log the composite error, then return it.
    #[default]
    LogAndRethrow,
}

impl ExceptionActionMode {
    #[must_use]
    pub fn logs(self) -> bool {
        matches!(self, Self::Log | Self::LogAndRethrow)
    }

    #[must_use]
    pub fn rethrows(self) -> bool {
        matches!(self, Self::Rethrow | Self::LogAndRethrow)
    }

    /// Case-insensitive parse of a configuration value.
    ///
    /// # Errors
    /// `ConfigError` naming the accepted values.
    pub fn parse(value: &str) -> Result<Self, SqlResilienceError> {
        let trimmed = value.trim();
        <Self as ValueEnum>::from_str(trimmed, true)
            .or_else(|_| {
                Self::value_variants()
                    .iter()
                    .find(|v| format!("{v:?}").eq_ignore_ascii_case(trimmed))
                    .copied()
                    .ok_or(())
            })
            .map_err(|()| {
                SqlResilienceError::ConfigError(format!(
                    "invalid exception action mode {value:?}; expected one of Rethrow, Log, LogAndRethrow"
                ))
            })
    }
}

/// Process-wide knobs handed to [`crate::Engine::new`].
///
/// `retry_multiply_value` is in milliseconds; the delay before retry `n` is
/// `n * retry_multiply_value`. The product `max_retry_count * retry_multiply_value`
/// always fits in a `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEngineConfig")]
pub struct EngineConfig {
    retry_multiply_value: u32,
    max_retry_count: u32,
    exception_action_mode: ExceptionActionMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_multiply_value: DEFAULT_RETRY_MULTIPLY_VALUE,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            exception_action_mode: ExceptionActionMode::default(),
        }
    }
}

fn check_pair(max_retry_count: u32, retry_multiply_value: u32) -> Result<(), SqlResilienceError> {
    if retry_multiply_value == 0 {
        return Err(SqlResilienceError::ConfigError(
            "retry multiply value must be greater than zero".to_string(),
        ));
    }
    if max_retry_count == 0 {
        return Err(SqlResilienceError::ConfigError(
            "max retry count must be greater than zero".to_string(),
        ));
    }
    if max_retry_count.checked_mul(retry_multiply_value).is_none() {
        return Err(SqlResilienceError::ConfigError(format!(
            "max retry count ({max_retry_count}) * retry multiply value ({retry_multiply_value}) must not exceed {}",
            u32::MAX
        )));
    }
    Ok(())
}

impl EngineConfig {
    /// # Errors
    /// `ConfigError` for zero values or an overflowing product.
    pub fn new(
        retry_multiply_value: u32,
        max_retry_count: u32,
        exception_action_mode: ExceptionActionMode,
    ) -> Result<Self, SqlResilienceError> {
        check_pair(max_retry_count, retry_multiply_value)?;
        Ok(Self {
            retry_multiply_value,
            max_retry_count,
            exception_action_mode,
        })
    }

    #[must_use]
    pub fn retry_multiply_value(&self) -> u32 {
        self.retry_multiply_value
    }

    #[must_use]
    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    #[must_use]
    pub fn exception_action_mode(&self) -> ExceptionActionMode {
        self.exception_action_mode
    }

    #[must_use]
    pub fn retry_multiplier(&self) -> Duration {
        Duration::from_millis(u64::from(self.retry_multiply_value))
    }

    /// # Errors
    /// `ConfigError` when zero or when the product with the retry count overflows.
    pub fn set_retry_multiply_value(&mut self, value: u32) -> Result<(), SqlResilienceError> {
        check_pair(self.max_retry_count, value)?;
        self.retry_multiply_value = value;
        Ok(())
    }

    /// # Errors
    /// `ConfigError` when zero or when the product with the multiplier overflows.
    pub fn set_max_retry_count(&mut self, value: u32) -> Result<(), SqlResilienceError> {
        check_pair(value, self.retry_multiply_value)?;
        self.max_retry_count = value;
        Ok(())
    }

    pub fn set_exception_action_mode(&mut self, mode: ExceptionActionMode) {
        self.exception_action_mode = mode;
    }

    /// # Errors
    /// See [`EngineConfig::set_retry_multiply_value`].
    pub fn with_retry_multiply_value(mut self, value: u32) -> Result<Self, SqlResilienceError> {
        self.set_retry_multiply_value(value)?;
        Ok(self)
    }

    /// # Errors
    /// See [`EngineConfig::set_max_retry_count`].
    pub fn with_max_retry_count(mut self, value: u32) -> Result<Self, SqlResilienceError> {
        self.set_max_retry_count(value)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_exception_action_mode(mut self, mode: ExceptionActionMode) -> Self {
        self.exception_action_mode = mode;
        self
    }

    /// Read `<PREFIX>_RETRY_MULTIPLY_VALUE`, `<PREFIX>_DB_TIMEOUT_RETRY_COUNT` and
    /// `<PREFIX>_EXCEPTION_ACTION_MODE` from the environment. Missing keys keep
    /// their defaults.
    ///
    /// # Errors
    /// `ConfigError` for values that do not parse or do not validate.
    pub fn from_env(prefix: &str) -> Result<Self, SqlResilienceError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// [`EngineConfig::from_env`] with an injectable lookup.
    ///
    /// # Errors
    /// `ConfigError` for values that do not parse or do not validate.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, SqlResilienceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let key = |suffix: &str| format!("{prefix}_{suffix}");

        let multiplier = lookup(&key("RETRY_MULTIPLY_VALUE"))
            .map(|raw| parse_u32(&key("RETRY_MULTIPLY_VALUE"), &raw))
            .transpose()?;
        let retries = lookup(&key("DB_TIMEOUT_RETRY_COUNT"))
            .map(|raw| parse_u32(&key("DB_TIMEOUT_RETRY_COUNT"), &raw))
            .transpose()?;
        check_pair(
            retries.unwrap_or(config.max_retry_count),
            multiplier.unwrap_or(config.retry_multiply_value),
        )?;
        if let Some(value) = multiplier {
            config.retry_multiply_value = value;
        }
        if let Some(value) = retries {
            config.max_retry_count = value;
        }
        if let Some(raw) = lookup(&key("EXCEPTION_ACTION_MODE")) {
            config.exception_action_mode = ExceptionActionMode::parse(&raw)?;
        }
        Ok(config)
    }
}

fn parse_u32(key: &str, raw: &str) -> Result<u32, SqlResilienceError> {
    raw.trim().parse::<u32>().map_err(|err| {
        SqlResilienceError::ConfigError(format!(
            "error while parsing configuration value {key}={raw:?}: {err}"
        ))
    })
}

#[derive(Deserialize)]
struct RawEngineConfig {
    #[serde(default = "default_multiplier")]
    retry_multiply_value: u32,
    #[serde(default = "default_retry_count")]
    max_retry_count: u32,
    #[serde(default)]
    exception_action_mode: ExceptionActionMode,
}

fn default_multiplier() -> u32 {
    DEFAULT_RETRY_MULTIPLY_VALUE
}

fn default_retry_count() -> u32 {
    DEFAULT_MAX_RETRY_COUNT
}

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = SqlResilienceError;

    fn try_from(raw: RawEngineConfig) -> Result<Self, Self::Error> {
        EngineConfig::new(
            raw.retry_multiply_value,
            raw.max_retry_count,
            raw.exception_action_mode,
        )
    }
}
