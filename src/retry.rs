use crate::config::RetryConfig;
use crate::error::{Error, ErrorKind, Result};
use rand::Rng;
use std::cmp::min;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule applied to `Transient` upstream failures. Other error
/// kinds are surfaced immediately.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Exponential delay for the given attempt (1-based), capped at
/// `max_backoff`, with full jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = policy
        .base_backoff
        .saturating_mul(2u32.saturating_pow(exponent));
    let capped = min(scaled, policy.max_backoff);
    if capped.is_zero() {
        return capped;
    }
    let jittered = rand::thread_rng().gen_range(0..=capped.as_millis() as u64);
    Duration::from_millis(jittered)
}

pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind() == ErrorKind::Transient && attempt < policy.max_attempts => {
                let delay = backoff_delay(policy, attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient upstream failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_is_capped_by_max_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(400),
        };
        for attempt in 1..=10 {
            assert!(backoff_delay(&policy, attempt) <= Duration::from_millis(400));
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        let calls = AtomicU32::new(0);
        let result = retry_transient(&policy, "list_vnets", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::transient("socket reset"))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_transient(&policy, "list_vnets", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::unauthorized("expired token")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
