//! Protection around every extraction call: per-backend circuit breakers, a
//! global concurrency cap and retry with linear backoff.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod registry;
pub mod retry;

use crate::config::types::ResilienceConfig;
use crate::extraction::{ExtractionError, ExtractionRequest, ExtractionResponse};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use rate_limiter::RateLimiter;
pub use registry::BackendRegistry;
pub use retry::{RetryFailure, RetryPolicy, Retryable};

/// Result of one protected extraction. Every variant except `Completed`
/// means the caller should carry on with empty results.
#[derive(Debug)]
pub enum ExtractionOutcome {
    Completed {
        backend_id: String,
        response: ExtractionResponse,
    },
    NoBackend,
    CircuitOpen {
        backend_id: String,
    },
    Exhausted {
        backend_id: String,
        attempts: u32,
        last_error: String,
    },
}

impl ExtractionOutcome {
    pub fn into_response(self) -> Option<ExtractionResponse> {
        match self {
            ExtractionOutcome::Completed { response, .. } => Some(response),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    CircuitOpen,
    Call(ExtractionError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::CircuitOpen => f.write_str("circuit open"),
            AttemptError::Call(e) => write!(f, "{}", e),
        }
    }
}

/// Shared resilience state. Built once at startup and handed to whoever
/// needs to call a backend; breakers are shared across all groups.
pub struct ResilienceContext {
    registry: BackendRegistry,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    failure_threshold: u32,
    recovery_timeout: Duration,
    call_timeout: Duration,
}

impl ResilienceContext {
    pub fn new(registry: BackendRegistry, config: &ResilienceConfig) -> Self {
        Self {
            registry,
            breakers: Mutex::new(HashMap::new()),
            limiter: RateLimiter::new(config.max_concurrent_calls),
            retry: RetryPolicy::new(config.retries, config.backoff),
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout,
            call_timeout: config.call_timeout,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breaker(&self, backend_id: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(backend_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    backend_id,
                    self.failure_threshold,
                    self.recovery_timeout,
                ))
            })
            .clone()
    }

    pub fn breaker_states(&self) -> Vec<(String, BreakerState)> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut states: Vec<(String, BreakerState)> = breakers
            .iter()
            .map(|(id, breaker)| (id.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Run one logical extraction through backend resolution, the breaker,
    /// the global limiter, a per-attempt timeout and retries. Never errors:
    /// failures come back as a non-`Completed` outcome.
    pub async fn extract(
        &self,
        request: &ExtractionRequest,
        session_default: Option<&str>,
    ) -> ExtractionOutcome {
        let Some((backend_id, backend)) = self.registry.resolve(request.kind, session_default)
        else {
            tracing::warn!(kind = %request.kind, "No extraction backend available");
            return ExtractionOutcome::NoBackend;
        };

        let breaker = self.breaker(&backend_id);
        let label = format!("{}:{}", backend_id, request.kind);
        let limiter = &self.limiter;
        let call_timeout = self.call_timeout;

        let result = self
            .retry
            .run(&label, |_attempt| {
                let breaker = breaker.clone();
                let backend = backend.clone();
                async move {
                    if !breaker.can_execute() {
                        return Err(Retryable::Permanent(AttemptError::CircuitOpen));
                    }

                    let _permit = limiter
                        .acquire()
                        .await
                        .map_err(|e| Retryable::Permanent(AttemptError::Call(e)))?;

                    match tokio::time::timeout(call_timeout, backend.extract(request)).await {
                        Ok(Ok(response)) => {
                            breaker.record_success();
                            Ok(response)
                        }
                        Ok(Err(e)) => {
                            breaker.record_failure();
                            Err(Retryable::Transient(AttemptError::Call(e)))
                        }
                        Err(_) => {
                            breaker.record_failure();
                            Err(Retryable::Transient(AttemptError::Call(
                                ExtractionError::Timeout(call_timeout),
                            )))
                        }
                    }
                }
            })
            .await;

        match result {
            Ok(response) => ExtractionOutcome::Completed {
                backend_id,
                response,
            },
            Err(RetryFailure::Aborted(AttemptError::CircuitOpen)) => {
                tracing::warn!(backend = %backend_id, kind = %request.kind, "Circuit open, skipping extraction");
                ExtractionOutcome::CircuitOpen { backend_id }
            }
            Err(RetryFailure::Aborted(e)) => ExtractionOutcome::Exhausted {
                backend_id,
                attempts: 1,
                last_error: e.to_string(),
            },
            Err(RetryFailure::Exhausted { attempts, last }) => ExtractionOutcome::Exhausted {
                backend_id,
                attempts,
                last_error: last.to_string(),
            },
        }
    }
}
