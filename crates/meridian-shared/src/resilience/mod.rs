//! Circuit-breaker primitives shared by the messaging, manager-HTTP, and
//! cron layers. A single generic `CircuitBreaker` implements the state
//! machine; callers that want a domain-named type (mirroring this
//! workspace's `TaskReadinessCircuitBreaker`-style wrappers) wrap an
//! `Arc<CircuitBreaker>` and delegate through `CircuitBreakerBehavior`.

mod behavior;
mod metrics;

pub use behavior::CircuitBreakerBehavior;
pub use metrics::{CircuitBreakerMetrics, MetricsCollector, PrometheusMetricsExporter};

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Circuit breaker state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn to_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for one `CircuitBreaker` instance.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to trip from Closed to Open.
    pub failure_threshold: u32,
    /// Duration the breaker stays Open before allowing a half-open probe.
    pub timeout: Duration,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    half_open_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

/// Generic circuit breaker: Closed → Open (on threshold breach) → HalfOpen
/// (after the recovery timeout elapses) → Closed (after enough half-open
/// successes) or back to Open (on any half-open failure).
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    opened_at: Mutex<Option<Instant>>,
    counters: Counters,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            state: AtomicU8::new(CircuitState::Closed.to_u8()),
            opened_at: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, new_state: CircuitState) {
        self.state.store(new_state.to_u8(), Ordering::SeqCst);
    }

    /// `true` if a call may proceed. Transitions Open → HalfOpen when the
    /// recovery timeout has elapsed.
    pub fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = {
                    let opened_at = self.opened_at.lock().expect("opened_at lock poisoned");
                    opened_at.map(|at| at.elapsed())
                };
                match elapsed {
                    Some(elapsed) if elapsed >= self.config.timeout => {
                        self.set_state(CircuitState::HalfOpen);
                        self.counters.half_open_calls.store(0, Ordering::SeqCst);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    pub fn record_success_manual(&self, duration: Duration) {
        self.counters.total_calls.fetch_add(1, Ordering::SeqCst);
        self.counters.success_count.fetch_add(1, Ordering::SeqCst);
        self.counters
            .total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);

        match self.state() {
            CircuitState::Closed => {
                self.counters.consecutive_failures.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.counters.half_open_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= u64::from(self.config.success_threshold) {
                    self.set_state(CircuitState::Closed);
                    self.counters.consecutive_failures.store(0, Ordering::SeqCst);
                    *self.opened_at.lock().expect("opened_at lock poisoned") = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure_manual(&self, duration: Duration) {
        self.counters.total_calls.fetch_add(1, Ordering::SeqCst);
        self.counters.failure_count.fetch_add(1, Ordering::SeqCst);
        self.counters
            .total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);

        match self.state() {
            CircuitState::Closed => {
                let failures =
                    self.counters.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= u64::from(self.config.failure_threshold) {
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self) {
        self.set_state(CircuitState::Open);
        *self.opened_at.lock().expect("opened_at lock poisoned") = Some(Instant::now());
    }

    pub fn is_healthy(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn force_open(&self) {
        self.open();
    }

    pub fn force_closed(&self) {
        self.set_state(CircuitState::Closed);
        self.counters.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.lock().expect("opened_at lock poisoned") = None;
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let total_calls = self.counters.total_calls.load(Ordering::SeqCst);
        let success_count = self.counters.success_count.load(Ordering::SeqCst);
        let failure_count = self.counters.failure_count.load(Ordering::SeqCst);
        let total_duration = Duration::from_nanos(
            self.counters.total_duration_nanos.load(Ordering::SeqCst),
        );

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            consecutive_failures: self.counters.consecutive_failures.load(Ordering::SeqCst),
            half_open_calls: self.counters.half_open_calls.load(Ordering::SeqCst),
            total_duration,
            current_state: self.state(),
            failure_rate: if total_calls == 0 {
                0.0
            } else {
                failure_count as f64 / total_calls as f64
            },
            success_rate: if total_calls == 0 {
                0.0
            } else {
                success_count as f64 / total_calls as f64
            },
            average_duration: if total_calls == 0 {
                Duration::ZERO
            } else {
                total_duration / total_calls as u32
            },
        }
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        self.name()
    }

    fn state(&self) -> CircuitState {
        self.state()
    }

    fn should_allow(&self) -> bool {
        self.should_allow()
    }

    fn record_success(&self, duration: Duration) {
        self.record_success_manual(duration);
    }

    fn record_failure(&self, duration: Duration) {
        self.record_failure_manual(duration);
    }

    fn is_healthy(&self) -> bool {
        self.is_healthy()
    }

    fn force_open(&self) {
        self.force_open();
    }

    fn force_closed(&self) {
        self.force_closed();
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test".to_string(),
            CircuitBreakerConfig {
                failure_threshold,
                timeout,
                success_threshold,
            },
        )
    }

    #[test]
    fn starts_closed_and_allows_calls() {
        let cb = breaker(3, 2, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.should_allow());
    }

    #[test]
    fn opens_after_consecutive_failure_threshold() {
        let cb = breaker(3, 2, Duration::from_secs(30));
        cb.record_failure_manual(Duration::ZERO);
        cb.record_failure_manual(Duration::ZERO);
        assert!(cb.should_allow());
        cb.record_failure_manual(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow());
    }

    #[test]
    fn success_resets_consecutive_failures_in_closed() {
        let cb = breaker(3, 2, Duration::from_secs(30));
        cb.record_failure_manual(Duration::ZERO);
        cb.record_failure_manual(Duration::ZERO);
        cb.record_success_manual(Duration::ZERO);
        assert_eq!(cb.metrics().consecutive_failures, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_timeout_elapses() {
        let cb = breaker(1, 2, Duration::from_millis(1));
        cb.record_failure_manual(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = breaker(1, 2, Duration::from_millis(1));
        cb.record_failure_manual(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.should_allow());
        cb.record_success_manual(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success_manual(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker(1, 2, Duration::from_millis(1));
        cb.record_failure_manual(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.should_allow());
        cb.record_failure_manual(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn force_open_and_force_closed() {
        let cb = breaker(3, 2, Duration::from_secs(30));
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_healthy());
    }

    #[test]
    fn metrics_track_rates() {
        let cb = breaker(5, 2, Duration::from_secs(30));
        cb.record_success_manual(Duration::from_millis(10));
        cb.record_failure_manual(Duration::from_millis(20));
        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 2);
        assert!((metrics.failure_rate - 0.5).abs() < f64::EPSILON);
    }
}
