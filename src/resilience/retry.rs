use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Error classification returned by one attempt
#[derive(Debug)]
pub enum Retryable<E> {
    /// Worth another attempt
    Transient(E),
    /// Stop retrying immediately
    Permanent(E),
}

#[derive(Debug)]
pub enum RetryFailure<E> {
    Aborted(E),
    Exhausted { attempts: u32, last: E },
}

/// Linear backoff: sleeps `base_backoff * n` after the n-th failed attempt
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_backoff,
        }
    }

    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.base_backoff * attempt
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryFailure<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Retryable<E>>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(Retryable::Permanent(e)) => return Err(RetryFailure::Aborted(e)),
                Err(Retryable::Transient(e)) => {
                    if attempt >= self.attempts {
                        tracing::warn!(
                            call = %label,
                            attempts = attempt,
                            error = %e,
                            "Retries exhausted"
                        );
                        return Err(RetryFailure::Exhausted { attempts: attempt, last: e });
                    }

                    let backoff = self.backoff_after(attempt);
                    tracing::warn!(
                        call = %label,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
