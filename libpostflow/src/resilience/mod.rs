//! Guards around calls to platform APIs
//!
//! Each primitive is an explicitly constructed object with its own internal
//! locking. The dispatcher owns one of each and shares them across workers.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryOutcome, RetryPolicy};
