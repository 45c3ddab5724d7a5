//! Unified interface over circuit breaker implementations.
//!
//! Object-safe (`Send + Sync + Debug`) so consumers can work with
//! `&dyn CircuitBreakerBehavior` when uniform access to any breaker is
//! needed (health reporting, metrics collection). Concrete types are
//! preferred in hot paths for zero-cost dispatch.

use std::time::Duration;

use super::{CircuitBreakerMetrics, CircuitState};

pub trait CircuitBreakerBehavior: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn state(&self) -> CircuitState;

    /// `true` for Closed, `true` for HalfOpen (limited probing), `true` for
    /// Open only once the recovery timeout has elapsed (transitioning to
    /// HalfOpen as a side effect).
    fn should_allow(&self) -> bool;

    fn record_success(&self, duration: Duration);

    fn record_failure(&self, duration: Duration);

    fn is_healthy(&self) -> bool;

    /// Emergency kill switch.
    fn force_open(&self);

    /// Emergency recovery.
    fn force_closed(&self);

    fn metrics(&self) -> CircuitBreakerMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time proof that CircuitBreakerBehavior is object-safe.
    fn _assert_object_safe(_: &dyn CircuitBreakerBehavior) {}
}
