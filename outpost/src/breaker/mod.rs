//! Circuit breakers for outbound platform calls.
//!
//! One breaker exists per service name. Several channels may share a service
//! (and therefore a breaker), so failures across many jobs against the same
//! platform accumulate in one place.

mod circuit;
mod registry;

pub use circuit::{
    BreakerConfig, BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState, Permit,
};
pub use registry::CircuitBreakerRegistry;
