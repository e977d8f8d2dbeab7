//! Retry Engine (C4): `execute_with_retry` over a caller-supplied async
//! operation, classifying retryability by the crate's own `Error` kind
//! rather than string matching.

use audit_core::error::Error;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub strategy: RetryStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: RetryStrategy::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (1-indexed), per the configured strategy's formula.
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        let raw = match self.strategy {
            RetryStrategy::Fixed => self.base_delay,
            RetryStrategy::Linear => self.base_delay.saturating_mul(n),
            RetryStrategy::Exponential => {
                let factor = 2_u32.checked_pow(n.saturating_sub(1)).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        let capped = raw.min(self.max_delay);

        if self.jitter {
            let jitter_range = capped.as_millis() as u64 / 2;
            if jitter_range == 0 {
                capped
            } else {
                let offset = rand::thread_rng().gen_range(0..=jitter_range);
                capped + Duration::from_millis(offset)
            }
        } else {
            capped
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

pub struct RetryOutcome<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<Error>,
    pub attempts: Vec<RetryAttempt>,
}

/// Runs `op` under `policy`, retrying while the returned error is retryable
/// and attempts remain. Non-retryable errors (validation, circuit-open, etc.)
/// abort immediately without consuming the remaining retry budget.
pub async fn execute_with_retry<T, F, Fut>(mut op: F, policy: &RetryPolicy) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempts = Vec::new();
    let mut attempt_number = 0;

    loop {
        attempt_number += 1;
        let timestamp = Utc::now();

        match op().await {
            Ok(result) => {
                attempts.push(RetryAttempt { attempt: attempt_number, timestamp, error: None });
                return RetryOutcome { success: true, result: Some(result), error: None, attempts };
            }
            Err(err) => {
                attempts.push(RetryAttempt { attempt: attempt_number, timestamp, error: Some(err.to_string()) });

                let retryable = err.is_retryable();
                let exhausted = attempt_number > policy.max_retries;

                if !retryable || exhausted {
                    return RetryOutcome { success: false, result: None, error: Some(err), attempts };
                }

                tokio::time::sleep(policy.delay_for_attempt(attempt_number)).await;
            }
        }
    }
}
