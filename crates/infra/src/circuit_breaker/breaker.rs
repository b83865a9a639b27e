use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Closed-state window after which a stale failure count resets.
    pub failure_timeout: Duration,
    /// Time spent open before a call may probe the service.
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    /// Upper bound the caller should enforce on a single call.
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_timeout: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            call_timeout: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_failure_timeout(mut self, timeout: Duration) -> Self {
        self.failure_timeout = timeout;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The wrapped function was not invoked.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Serializable point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    total_rejections: u64,
    /// A half-open trial call is running.
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_time: None,
            last_state_change: Utc::now(),
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
            total_rejections: 0,
            probe_in_flight: false,
        }
    }

    fn transition(&mut self, name: &str, to: CircuitState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        self.last_state_change = Utc::now();
        self.success_count = 0;
        if to == CircuitState::Closed {
            self.failure_count = 0;
        }
        match to {
            CircuitState::Open => warn!(breaker = name, ?from, "circuit opened"),
            _ => info!(breaker = name, ?from, ?to, "circuit state changed"),
        }
    }

    fn failure_window_expired(&self, window: Duration) -> bool {
        self.last_failure
            .is_some_and(|at| at.elapsed() >= window)
    }
}

/// A named circuit breaker. All state changes happen under one mutex; the
/// wrapped call runs outside it.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State stays consistent across a panic elsewhere: every update is a
        // handful of plain assignments.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `f` through the breaker.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _slot = ProbeSlot {
            breaker: self,
            held: self.before_call()?,
        };
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Admit or reject a call. Returns whether the call holds the half-open
    /// probe slot.
    fn before_call<E>(&self) -> Result<bool, BreakerError<E>> {
        let mut st = self.lock();
        st.total_calls += 1;

        if st.state == CircuitState::Open {
            let recovered = st
                .last_failure
                .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);
            if !recovered {
                st.total_rejections += 1;
                return Err(self.rejected());
            }
            st.transition(&self.name, CircuitState::HalfOpen);
        }

        if st.state != CircuitState::HalfOpen {
            return Ok(false);
        }
        if st.probe_in_flight {
            st.total_rejections += 1;
            return Err(self.rejected());
        }
        st.probe_in_flight = true;
        Ok(true)
    }

    fn rejected<E>(&self) -> BreakerError<E> {
        BreakerError::Open {
            name: self.name.clone(),
        }
    }

    fn record_success(&self) {
        let mut st = self.lock();
        st.total_successes += 1;

        match st.state {
            CircuitState::HalfOpen => {
                st.success_count += 1;
                if st.success_count >= self.config.success_threshold {
                    st.transition(&self.name, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                if st.failure_window_expired(self.config.failure_timeout) {
                    st.failure_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut st = self.lock();
        st.total_failures += 1;

        match st.state {
            CircuitState::Closed => {
                if st.failure_window_expired(self.config.failure_timeout) {
                    st.failure_count = 0;
                }
                st.failure_count += 1;
                if st.failure_count >= self.config.failure_threshold {
                    st.transition(&self.name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                st.failure_count += 1;
                st.transition(&self.name, CircuitState::Open);
            }
            CircuitState::Open => {
                st.failure_count += 1;
            }
        }
        st.last_failure = Some(Instant::now());
        st.last_failure_time = Some(Utc::now());
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let st = self.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            last_failure_time: st.last_failure_time,
            last_state_change: st.last_state_change,
            total_calls: st.total_calls,
            total_failures: st.total_failures,
            total_successes: st.total_successes,
            total_rejections: st.total_rejections,
        }
    }

    /// Force the breaker closed. Cumulative counters are kept.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.transition(&self.name, CircuitState::Closed);
        st.failure_count = 0;
        st.success_count = 0;
        st.last_failure = None;
        st.probe_in_flight = false;
    }
}

/// Frees the half-open probe slot when the call finishes or is dropped.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(3)
                .with_recovery_timeout(Duration::from_secs(30))
                .with_success_threshold(2),
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.call(|| async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_skips_the_call() {
        let b = breaker();
        for _ in 0..3 {
            assert!(matches!(fail(&b).await, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(b.state(), CircuitState::Open);

        let invoked = AtomicUsize::new(0);
        let res = b
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &'static str>(())
            })
            .await;
        assert!(res.unwrap_err().is_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(b.stats().total_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_recovery_then_closes() {
        let b = breaker();
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(succeed(&b).await.is_ok());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(succeed(&b).await.is_ok());
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_one_probe_at_a_time() {
        let b = breaker();
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        let (probe, concurrent) = tokio::join!(
            b.call(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<(), &'static str>(())
            }),
            async {
                tokio::task::yield_now().await;
                succeed(&b).await
            },
        );
        assert!(probe.is_ok());
        assert!(concurrent.unwrap_err().is_open());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.stats().total_rejections, 1);

        assert!(succeed(&b).await.is_ok());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_frees_the_slot() {
        let b = breaker();
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        let stalled = b.call(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), &'static str>(())
        });
        assert!(tokio::time::timeout(Duration::from_secs(1), stalled).await.is_err());

        assert!(succeed(&b).await.is_ok());
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let b = breaker();
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(matches!(fail(&b).await, Err(BreakerError::Inner(_))));
        assert_eq!(b.state(), CircuitState::Open);
        // Recovery clock restarted by the half-open failure.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(succeed(&b).await.unwrap_err().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_failures_expire_while_closed() {
        let b = breaker();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = fail(&b).await;

        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_inside_window_keeps_failure_count() {
        let b = breaker();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert!(succeed(&b).await.is_ok());
        let _ = fail(&b).await;

        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let b = breaker();
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(succeed(&b).await.is_ok());

        let stats = b.stats();
        assert_eq!(stats.total_calls, 4);
        assert_eq!(stats.total_failures, 3);
        assert_eq!(stats.total_successes, 1);
    }

    #[test]
    fn stats_serialize_state_in_snake_case() {
        let json = serde_json::to_value(breaker().stats()).unwrap();
        assert_eq!(json["state"], "closed");
        assert_eq!(json["name"], "test");
    }
}
