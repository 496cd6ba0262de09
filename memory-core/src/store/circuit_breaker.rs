//! Circuit breaker protecting every backend call.
//!
//! States: **Closed** (normal) → **Open** after `failure_threshold`
//! consecutive recoverable failures (calls rejected immediately) →
//! **HalfOpen** after `open_duration` (a single probe is allowed) →
//! **Closed** again on probe success, back to **Open** on probe failure.
//!
//! Only recoverable errors count toward the threshold; an invalid-input
//! error says nothing about backend health.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls pass through
    Closed,
    /// Failing fast; calls are rejected without touching the backend
    Open,
    /// Cooldown elapsed; a probe call is allowed through
    HalfOpen,
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStats {
    /// Calls attempted (rejected calls not included)
    pub total_calls: u64,
    /// Calls that succeeded
    pub successful_calls: u64,
    /// Calls that failed with a recoverable error
    pub failed_calls: u64,
    /// Calls rejected while the circuit was open
    pub rejected_calls: u64,
    /// Current consecutive failure count
    pub consecutive_failures: u32,
    /// How many times the circuit has opened
    pub circuit_opened_count: u32,
}

struct BreakerInner {
    state: CircuitState,
    stats: CircuitBreakerStats,
    last_failure_at: Option<Instant>,
}

/// Shared circuit breaker for one backend.
///
/// One instance is shared across every component talking to the same
/// backend, so a failure burst seen by any tier protects all of them.
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_duration: Duration,
    inner: Arc<RwLock<BreakerInner>>,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `failure_threshold` consecutive
    /// recoverable failures and cools down for `open_duration`.
    #[must_use]
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        info!(
            threshold = failure_threshold,
            cooldown_ms = open_duration.as_millis() as u64,
            "initializing backend circuit breaker"
        );
        Self {
            failure_threshold: failure_threshold.max(1),
            open_duration,
            inner: Arc::new(RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                stats: CircuitBreakerStats::default(),
                last_failure_at: None,
            })),
        }
    }

    /// Run an operation under the breaker.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` without touching the backend while the
    /// circuit is open; otherwise whatever the operation returns.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.admit().await {
            let mut inner = self.inner.write().await;
            inner.stats.rejected_calls += 1;
            debug!("circuit open, rejecting backend call");
            return Err(Error::circuit_open());
        }

        {
            let mut inner = self.inner.write().await;
            inner.stats.total_calls += 1;
        }

        let result = operation().await;
        self.record(&result).await;
        result
    }

    /// Decide whether a call may proceed, transitioning Open → HalfOpen
    /// once the cooldown has elapsed.
    async fn admit(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match inner.last_failure_at {
                Some(at) if at.elapsed() >= self.open_duration => {
                    info!("circuit cooldown elapsed, probing backend");
                    inner.state = CircuitState::HalfOpen;
                    true
                }
                _ => false,
            },
        }
    }

    async fn record<T>(&self, result: &Result<T>) {
        let mut inner = self.inner.write().await;
        match result {
            Ok(_) => {
                inner.stats.successful_calls += 1;
                inner.stats.consecutive_failures = 0;
                if inner.state != CircuitState::Closed {
                    info!("backend recovered, closing circuit");
                    inner.state = CircuitState::Closed;
                    inner.last_failure_at = None;
                }
            }
            Err(err) if err.is_recoverable() => {
                inner.stats.failed_calls += 1;
                inner.stats.consecutive_failures += 1;
                inner.last_failure_at = Some(Instant::now());
                debug!(
                    failures = inner.stats.consecutive_failures,
                    threshold = self.failure_threshold,
                    "recorded backend failure"
                );
                let tripped = match inner.state {
                    CircuitState::Closed => {
                        inner.stats.consecutive_failures >= self.failure_threshold
                    }
                    CircuitState::HalfOpen => true,
                    CircuitState::Open => false,
                };
                if tripped {
                    warn!(
                        failures = inner.stats.consecutive_failures,
                        "opening backend circuit"
                    );
                    inner.state = CircuitState::Open;
                    inner.stats.circuit_opened_count += 1;
                }
            }
            Err(err) => {
                // Caller bug or bad data, not backend health
                debug!("non-recoverable error, circuit unaffected: {}", err);
            }
        }
    }

    /// Current state.
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Current statistics.
    pub async fn stats(&self) -> CircuitBreakerStats {
        self.inner.read().await.stats.clone()
    }

    /// Force the circuit closed. For tests and manual intervention.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        info!("circuit breaker reset");
        inner.state = CircuitState::Closed;
        inner.stats.consecutive_failures = 0;
        inner.last_failure_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_err() -> Error {
        Error::BackendUnavailable {
            reason: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_starts_closed_and_passes_calls() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        let result = cb.call(|| async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state().await, CircuitState::Closed);

        let stats = cb.stats().await;
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.successful_calls, 1);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            let _ = cb.call(|| async { Err::<i32, Error>(backend_err()) }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        let result = cb.call(|| async { Ok::<i32, Error>(1) }).await;
        assert!(matches!(result, Err(Error::BackendUnavailable { .. })));
        assert_eq!(cb.stats().await.rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_closes_on_success() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(5));
        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<i32, Error>(backend_err()) }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(6)).await;

        let result = cb.call(|| async { Ok::<i32, Error>(7) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.stats().await.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(5));
        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<i32, Error>(backend_err()) }).await;
        }
        tokio::time::advance(Duration::from_secs(6)).await;

        let _ = cb.call(|| async { Err::<i32, Error>(backend_err()) }).await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(cb.stats().await.circuit_opened_count, 2);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(30));
        for _ in 0..3 {
            let _ = cb.call(|| async { Err::<i32, Error>(backend_err()) }).await;
        }
        assert_eq!(cb.stats().await.consecutive_failures, 3);

        let _ = cb.call(|| async { Ok::<i32, Error>(0) }).await;
        assert_eq!(cb.stats().await.consecutive_failures, 0);
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_non_recoverable_errors_do_not_trip() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(30));
        for _ in 0..5 {
            let _ = cb
                .call(|| async { Err::<i32, Error>(Error::InvalidInput("bad".to_string())) })
                .await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.stats().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_reset_closes_circuit() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(30));
        let _ = cb.call(|| async { Err::<i32, Error>(backend_err()) }).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        cb.reset().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }
}
