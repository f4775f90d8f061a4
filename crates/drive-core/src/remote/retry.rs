//! Bounded exponential retry for remote calls

use std::future::Future;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use super::{RemoteError, RemoteResult};

/// Retry schedule applied to every remote call.
///
/// Transient failures are retried with exponential backoff until
/// `max_attempts` calls have been made; permanent failures return at once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total calls allowed for one operation, including the first
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Same attempt cap with millisecond waits, for tests and local stores.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `call` until it succeeds, fails permanently, or the attempt cap
    /// is reached.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        let attempt_once = || {
            attempt += 1;
            let current = attempt;
            let pending = call();
            async move {
                pending.await.map_err(|e| {
                    if e.is_transient() && current < max_attempts {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        };

        backoff::future::retry_notify(
            self.schedule(),
            attempt_once,
            |e: RemoteError, wait: Duration| {
                tracing::warn!(
                    operation,
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "Transient remote failure, retrying"
                );
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_after_max_attempts_on_transient_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result: RemoteResult<()> = policy
            .run("list", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::transient("timeout")) }
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(5);

        let result: RemoteResult<()> = policy
            .run("delete", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::not_found("x")) }
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(5);

        let result = policy
            .run("create_file", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RemoteError::transient("503"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
