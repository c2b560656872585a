//! Bounded worker pool with retry/backoff and a start-rate ceiling.

mod backoff;
mod limiter;
mod pool;

pub use backoff::backoff_delay;
pub use limiter::StartRateLimiter;
pub use pool::{ProcessorFactory, WorkerPool, WorkerPoolStatus};
