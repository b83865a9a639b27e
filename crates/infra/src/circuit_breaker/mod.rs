//! Per-service circuit breakers.
//!
//! ## States
//!
//! - **Closed**: calls pass through; failures are counted inside a rolling
//!   `failure_timeout` window and `failure_threshold` of them open the circuit.
//! - **Open**: calls fail fast with [`BreakerError::Open`] until
//!   `recovery_timeout` has passed since the last failure.
//! - **HalfOpen**: calls are attempted; one failure reopens, `success_threshold`
//!   consecutive successes close.
//!
//! State lives in process memory; replicas do not share it.

pub mod breaker;
pub mod registry;

pub use breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use registry::CircuitBreakerRegistry;
