//! Three-state circuit breaker
//!
//! State machine: closed -> open when the observed failure ratio crosses
//! the threshold, open -> half-open after the open timeout, half-open ->
//! closed on a success or back to open on a failure.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    requests: u32,
    failures: u32,
    opened_at: Option<Instant>,
    half_open_calls: u32,
}

/// Why a call was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerRejection {
    Open,
    TooManyHalfOpenCalls,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    min_requests: u32,
    failure_ratio: f64,
    open_timeout: Duration,
    half_open_max_calls: u32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        min_requests: u32,
        failure_ratio: f64,
        open_timeout: Duration,
        half_open_max_calls: u32,
    ) -> Self {
        Self {
            min_requests,
            failure_ratio,
            open_timeout,
            half_open_max_calls,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                requests: 0,
                failures: 0,
                opened_at: None,
                half_open_calls: 0,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Admit or reject a call. An open breaker transitions to half-open
    /// once the open timeout has elapsed.
    pub fn try_acquire(&self) -> std::result::Result<(), BreakerRejection> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.open_timeout)
                    .unwrap_or(true);
                if !expired {
                    return Err(BreakerRejection::Open);
                }
                inner.state = BreakerState::HalfOpen;
                inner.half_open_calls = 1;
                Ok(())
            }
            BreakerState::HalfOpen => {
                if inner.half_open_calls >= self.half_open_max_calls {
                    return Err(BreakerRejection::TooManyHalfOpenCalls);
                }
                inner.half_open_calls += 1;
                Ok(())
            }
        }
    }

    /// Record the outcome of an admitted call. Failures that the
    /// classifier chose not to record must be reported as successes.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.requests += 1;
                if !success {
                    inner.failures += 1;
                    let ratio = f64::from(inner.failures) / f64::from(inner.requests);
                    if inner.requests >= self.min_requests && ratio >= self.failure_ratio {
                        Self::open(&mut inner);
                    }
                }
            }
            BreakerState::HalfOpen => {
                if success {
                    Self::close(&mut inner);
                } else {
                    Self::open(&mut inner);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn open(inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.requests = 0;
        inner.failures = 0;
        inner.half_open_calls = 0;
    }

    fn close(inner: &mut BreakerInner) {
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
        inner.requests = 0;
        inner.failures = 0;
        inner.half_open_calls = 0;
    }
}
