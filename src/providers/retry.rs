// Exponential backoff with full jitter for provider REST calls

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::providers::errors::ProviderError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    #[allow(dead_code)]
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
        }
    }

    /// Lookups keep a single retry.
    pub fn lightweight(&self) -> Self {
        Self {
            max_retries: self.max_retries.min(1),
            ..*self
        }
    }

    fn delay_for(&self, attempt: u32) -> u64 {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
        let cap = exp.min(self.max_delay_ms);
        if cap > self.base_delay_ms {
            SmallRng::from_entropy().gen_range(self.base_delay_ms..=cap)
        } else {
            self.base_delay_ms
        }
    }
}

pub async fn with_retries<F, Fut, T>(
    provider: &'static str,
    desc: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !e.is_transient() || attempt >= policy.max_retries {
                    return Err(e);
                }

                let delay_ms = policy.delay_for(attempt);
                warn!(
                    provider,
                    desc = %desc,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    error = %e,
                    next_delay_ms = delay_ms,
                    "retrying transient provider error"
                );

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, 1, 2);
        let result = with_retries("stripe", "test", policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Http("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("paypal", "test", RetryPolicy::new(3, 1, 2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Precondition("bad".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_stays_within_bounds() {
        let policy = RetryPolicy::new(5, 100, 400);
        for attempt in 0..6 {
            let d = policy.delay_for(attempt);
            assert!((100..=400).contains(&d));
        }
    }
}
