use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
}

/// Per-backend circuit breaker.
///
/// `failure_threshold` consecutive failures open the circuit. After
/// `recovery_timeout` one probe call is admitted; its result closes or reopens
/// the circuit. A probe that never reports back is given up on after another
/// `recovery_timeout`, so an abandoned call cannot wedge the breaker half-open.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_started: None,
            }),
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> BreakerState {
        self.inner().state
    }

    /// Whether a call may proceed now. Admitting the half-open probe counts as
    /// a state change: the caller must report the outcome.
    pub fn can_execute(&self) -> bool {
        self.can_execute_at(Instant::now())
    }

    pub(crate) fn can_execute_at(&self, now: Instant) -> bool {
        let mut inner = self.inner();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let recovered = inner
                    .opened_at
                    .map_or(true, |at| now.duration_since(at) >= self.recovery_timeout);
                if recovered {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_started = Some(now);
                    tracing::info!(backend = %self.name, "Circuit half-open, admitting probe");
                }
                recovered
            }
            BreakerState::HalfOpen => {
                let probe_lost = inner
                    .probe_started
                    .map_or(true, |at| now.duration_since(at) >= self.recovery_timeout);
                if probe_lost {
                    inner.probe_started = Some(now);
                }
                probe_lost
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner();
        if inner.state != BreakerState::Closed {
            tracing::info!(backend = %self.name, "Circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_started = None;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub(crate) fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.probe_started = None;
                tracing::warn!(backend = %self.name, "Probe failed, circuit reopened");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    tracing::warn!(
                        backend = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit opened"
                    );
                }
            }
            // A call admitted before the circuit opened finished late
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECOVERY: Duration = Duration::from_secs(60);

    fn open_breaker(start: Instant) -> CircuitBreaker {
        let breaker = CircuitBreaker::new("llm", 3, RECOVERY);
        for _ in 0..3 {
            assert!(breaker.can_execute_at(start));
            breaker.record_failure_at(start);
        }
        breaker
    }

    #[test]
    fn test_opens_after_threshold() {
        let start = Instant::now();
        let breaker = CircuitBreaker::new("llm", 3, RECOVERY);
        breaker.record_failure_at(start);
        breaker.record_failure_at(start);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_execute_at(start));

        breaker.record_failure_at(start);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute_at(start + Duration::from_secs(59)));
    }

    #[test]
    fn test_success_resets_failure_run() {
        let start = Instant::now();
        let breaker = CircuitBreaker::new("llm", 3, RECOVERY);
        breaker.record_failure_at(start);
        breaker.record_failure_at(start);
        breaker.record_success();
        breaker.record_failure_at(start);
        breaker.record_failure_at(start);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_admits_exactly_one_probe() {
        let start = Instant::now();
        let breaker = open_breaker(start);
        let later = start + RECOVERY;

        assert!(breaker.can_execute_at(later));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.can_execute_at(later));
        assert!(!breaker.can_execute_at(later + Duration::from_secs(1)));
    }

    #[test]
    fn test_probe_success_closes() {
        let start = Instant::now();
        let breaker = open_breaker(start);
        assert!(breaker.can_execute_at(start + RECOVERY));
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_execute_at(start + RECOVERY));
    }

    #[test]
    fn test_probe_failure_reopens_immediately() {
        let start = Instant::now();
        let breaker = open_breaker(start);
        let probe_time = start + RECOVERY;
        assert!(breaker.can_execute_at(probe_time));
        breaker.record_failure_at(probe_time);

        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute_at(probe_time + Duration::from_secs(30)));
        assert!(breaker.can_execute_at(probe_time + RECOVERY));
    }

    #[test]
    fn test_lost_probe_is_replaced() {
        let start = Instant::now();
        let breaker = open_breaker(start);
        assert!(breaker.can_execute_at(start + RECOVERY));
        // Probe never reports back
        assert!(breaker.can_execute_at(start + RECOVERY * 2));
        assert!(!breaker.can_execute_at(start + RECOVERY * 2));
    }
}
