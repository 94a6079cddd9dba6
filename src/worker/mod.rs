//! Bounded-concurrency workers, retry policy and outbound rate limiting.

pub mod pool;
pub mod rate_limiter;
pub mod retry;

pub use pool::{WorkerContext, WorkerPool};
pub use rate_limiter::{RateLimiter, TokenBucket};
pub use retry::{FailureClass, FailureClassifier, RetryDecision, RetryPolicy};
