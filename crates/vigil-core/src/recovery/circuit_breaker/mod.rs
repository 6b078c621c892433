//! Circuit breaker pattern for backend calls
//!
//! Stops sending work to a backend that keeps failing, then lets exactly one
//! trial call through after a cooldown to test whether it has recovered.

mod breaker;
mod registry;
mod types;

pub use breaker::CircuitBreaker;
pub use registry::CircuitBreakerRegistry;
pub use types::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
