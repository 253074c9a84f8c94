//! Retry and circuit-breaker execution
//!
//! The executor runs a callback on behalf of a named operation with
//! bounded retries and an optional per-operation circuit breaker. A
//! pluggable classifier decides whether a failure is retryable and
//! whether the breaker should count it. This is the single place where
//! retryable or circuit-open failures get surfaced as `Temporary`.

mod breaker;

pub use breaker::{BreakerState, CircuitBreaker};

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// What the classifier decided about a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassification {
    pub retryable: bool,
    pub record_failure: bool,
}

/// Classifies an error for retry and breaker accounting
pub type ErrorClassifier = fn(&Error) -> ErrorClassification;

/// Conservative default: never retry, always count the failure.
pub fn default_classifier(_err: &Error) -> ErrorClassification {
    ErrorClassification {
        retryable: false,
        record_failure: true,
    }
}

/// Retry and breaker settings
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub retry_max_attempts: usize,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub retry_multiplier: f64,

    pub breaker_enabled: bool,
    pub breaker_min_requests: u32,
    pub breaker_failure_ratio: f64,
    pub breaker_open_timeout: Duration,
    pub breaker_half_open_max_calls: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: 3,
            retry_initial_backoff: Duration::from_millis(100),
            retry_max_backoff: Duration::from_millis(400),
            retry_multiplier: 2.0,

            breaker_enabled: true,
            breaker_min_requests: 10,
            breaker_failure_ratio: 0.5,
            breaker_open_timeout: Duration::from_secs(30),
            breaker_half_open_max_calls: 2,
        }
    }
}

impl ResilienceConfig {
    /// Replace zero or out-of-range values with the defaults.
    pub fn normalize(mut self) -> Self {
        let def = ResilienceConfig::default();
        if self.retry_max_attempts == 0 {
            self.retry_max_attempts = def.retry_max_attempts;
        }
        if self.retry_initial_backoff.is_zero() {
            self.retry_initial_backoff = def.retry_initial_backoff;
        }
        if self.retry_max_backoff.is_zero() {
            self.retry_max_backoff = def.retry_max_backoff;
        }
        if self.retry_max_backoff < self.retry_initial_backoff {
            self.retry_max_backoff = self.retry_initial_backoff;
        }
        if self.retry_multiplier < 1.0 {
            self.retry_multiplier = def.retry_multiplier;
        }
        if self.breaker_min_requests == 0 {
            self.breaker_min_requests = def.breaker_min_requests;
        }
        if self.breaker_failure_ratio <= 0.0 || self.breaker_failure_ratio > 1.0 {
            self.breaker_failure_ratio = def.breaker_failure_ratio;
        }
        if self.breaker_open_timeout.is_zero() {
            self.breaker_open_timeout = def.breaker_open_timeout;
        }
        if self.breaker_half_open_max_calls == 0 {
            self.breaker_half_open_max_calls = def.breaker_half_open_max_calls;
        }
        self
    }
}

/// Executes callbacks with retry and per-operation circuit breaking
pub struct Executor {
    cfg: ResilienceConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Executor {
    pub fn new(cfg: ResilienceConfig) -> Self {
        Self {
            cfg: cfg.normalize(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` for the named operation. The callback is invoked once per
    /// attempt; dropping the returned future (for example when an outer
    /// timeout fires) aborts the in-flight attempt without recording it.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        classifier: ErrorClassifier,
        f: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let op = operation.trim();
        let op = if op.is_empty() { "unknown" } else { op };

        if !self.cfg.breaker_enabled {
            return self.execute_with_retry(op, classifier, &f).await;
        }

        let breaker = self.breaker(op);
        if breaker.try_acquire().is_err() {
            return Err(Error::CircuitOpen(op.to_string()));
        }
        let result = self.execute_with_retry(op, classifier, &f).await;
        let success = match &result {
            Ok(_) => true,
            Err(err) => !classifier(err).record_failure,
        };
        breaker.record(success);
        result
    }

    async fn execute_with_retry<T, F, Fut>(
        &self,
        operation: &str,
        classifier: ErrorClassifier,
        f: &F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.cfg.retry_max_attempts;
        let mut backoff = self.cfg.retry_initial_backoff;

        for attempt in 1..=max_attempts {
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let class = classifier(&err);
            if !class.retryable || attempt == max_attempts {
                return Err(err);
            }

            let wait = backoff.min(self.cfg.retry_max_backoff);
            warn!(
                operation,
                attempt,
                max_attempts,
                backoff_ms = wait.as_millis() as u64,
                error = %err,
                "retry_attempt"
            );
            tokio::time::sleep(wait).await;

            backoff = backoff
                .mul_f64(self.cfg.retry_multiplier)
                .min(self.cfg.retry_max_backoff);
        }

        unreachable!("retry loop returns on the final attempt")
    }

    fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker map lock poisoned");
        breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.cfg.breaker_min_requests,
                    self.cfg.breaker_failure_ratio,
                    self.cfg.breaker_open_timeout,
                    self.cfg.breaker_half_open_max_calls,
                ))
            })
            .clone()
    }
}

/// Surface a failure as `Temporary` when it is retryable or the circuit is
/// open; other failures propagate unchanged. Already-temporary errors pass
/// through.
pub fn surface_temporary(operation: &str, err: Error, classifier: ErrorClassifier) -> Error {
    if matches!(err, Error::Temporary { .. }) {
        return err;
    }
    if matches!(err, Error::CircuitOpen(_)) || classifier(&err).retryable {
        return Error::temporary(operation, err);
    }
    err
}
