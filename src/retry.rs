//! Timeout classification and the backoff schedule.

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::config::EngineConfig;
use crate::error::SqlResilienceError;

/// Text every supported driver puts in its command-timeout error.
///
/// Matching is literal and case-sensitive: drivers expose no structured timeout
/// code, and localized driver messages are not recognized.
pub const TIMEOUT_MARKER: &str = "Timeout expired.";

/// True when the error reads as a driver command timeout.
#[must_use]
pub fn is_command_timeout(err: &SqlResilienceError) -> bool {
    match err {
        SqlResilienceError::CommandTimeout(_) => true,
        SqlResilienceError::Escalated(_) => false,
        other => other.to_string().contains(TIMEOUT_MARKER),
    }
}

/// Per-call retry bookkeeping. Never shared between calls.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u32,
    started_at: DateTime<Local>,
}

impl RetryState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            attempts: 0,
            started_at: Local::now(),
        }
    }

    /// Mark the start of the next attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.started_at = Local::now();
        self.attempts
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wall-clock start of the current attempt.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then run attempt `next_attempt`.
    Retry { delay: Duration, next_attempt: u32 },
    /// Every attempt timed out.
    BudgetExhausted { attempts: u32 },
    /// Not a timeout; never retried.
    Unexpected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    multiplier: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, multiplier: Duration) -> Self {
        Self {
            max_attempts,
            multiplier,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_retry_count(), config.retry_multiplier())
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry `n` (1-based): `n * multiplier`.
    #[must_use]
    pub fn backoff(&self, n: u32) -> Duration {
        self.multiplier.saturating_mul(n)
    }

    /// Decide what follows a failed attempt.
    #[must_use]
    pub fn decide(&self, state: &RetryState, timed_out: bool) -> RetryDecision {
        let attempts = state.attempts();
        if !timed_out {
            return RetryDecision::Unexpected;
        }
        if attempts < self.max_attempts {
            RetryDecision::Retry {
                delay: self.backoff(attempts),
                next_attempt: attempts + 1,
            }
        } else {
            RetryDecision::BudgetExhausted { attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_detection_is_literal() {
        assert!(is_command_timeout(&SqlResilienceError::CommandTimeout(
            "after 30s".into()
        )));
        assert!(is_command_timeout(&SqlResilienceError::ExecutionError(
            "Timeout expired. The timeout period elapsed".into()
        )));
        assert!(!is_command_timeout(&SqlResilienceError::ExecutionError(
            "timeout expired".into()
        )));
        assert!(!is_command_timeout(&SqlResilienceError::ExecutionError(
            "deadlock".into()
        )));
    }

    #[test]
    fn three_attempts_then_budget_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let mut state = RetryState::new();

        state.begin_attempt();
        assert_eq!(
            policy.decide(&state, true),
            RetryDecision::Retry {
                delay: Duration::from_millis(100),
                next_attempt: 2
            }
        );
        state.begin_attempt();
        assert_eq!(
            policy.decide(&state, true),
            RetryDecision::Retry {
                delay: Duration::from_millis(200),
                next_attempt: 3
            }
        );
        state.begin_attempt();
        assert_eq!(
            policy.decide(&state, true),
            RetryDecision::BudgetExhausted { attempts: 3 }
        );
    }

    #[test]
    fn non_timeouts_escalate_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let mut state = RetryState::new();
        state.begin_attempt();
        assert_eq!(policy.decide(&state, false), RetryDecision::Unexpected);
    }

    #[test]
    fn single_attempt_budget_never_retries() {
        let policy = RetryPolicy::new(1, Duration::from_millis(100));
        let mut state = RetryState::new();
        state.begin_attempt();
        assert_eq!(
            policy.decide(&state, true),
            RetryDecision::BudgetExhausted { attempts: 1 }
        );
    }
}
