//! Bounded retry for transient storage faults.
//!
//! Only faults [`QuizBankError::is_transient`] admits are retried; logical
//! failures (validation, conflicts, missing references) surface immediately.
//!
//! ## Configuration
//!
//! - `QUIZBANK_RETRY_MAX_ATTEMPTS`: Attempt budget (default: 3)
//! - `QUIZBANK_RETRY_BASE_DELAY_MS`: First backoff delay in milliseconds
//!   (default: 10, doubling per attempt)

use std::time::Duration;

use quizbank_core::{QuizBankError, Result};
use tracing::warn;

/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 10;

/// Retry budget and backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            max_attempts: env_parse("QUIZBANK_RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            base_delay: Duration::from_millis(env_parse(
                "QUIZBANK_RETRY_BASE_DELAY_MS",
                DEFAULT_BASE_DELAY_MS,
            )),
        }
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base backoff delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

/// Run `op` under the policy, retrying transient failures with exponential
/// backoff. Returns `RETRY_EXHAUSTED` once the budget is spent.
pub fn with_retry<T, F>(operation: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempts = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(QuizBankError::RetryExhausted(format!(
                        "{} still failing after {} attempts: {}",
                        operation, attempts, err
                    )));
                }
                let delay = policy.base_delay * 2u32.saturating_pow(attempts - 1);
                warn!(
                    operation,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient storage fault, retrying"
                );
                std::thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Parse an environment variable with a default fallback.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
