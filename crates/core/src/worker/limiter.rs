//! Token bucket capping job starts per minute.
//!
//! The ceiling is independent of worker concurrency: a wide pool on a
//! struggling converter host can still be throttled to a sustainable
//! start rate.

use std::sync::Mutex;
use tokio::time::Instant;

/// Token bucket: tokens refill at a constant rate and one is consumed per
/// job start. The bucket starts full, allowing an initial burst up to the
/// per-minute ceiling.
struct Bucket {
    capacity: f32,
    tokens: f32,
    refill_rate: f32,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Shared start-rate limiter for the worker pool.
pub struct StartRateLimiter {
    bucket: Mutex<Bucket>,
}

impl StartRateLimiter {
    pub fn new(starts_per_minute: u32) -> Self {
        let capacity = starts_per_minute as f32;
        Self {
            bucket: Mutex::new(Bucket {
                capacity,
                tokens: capacity,
                refill_rate: capacity / 60.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take a start token. Returns false when the ceiling is hit.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap();
        bucket.refill();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Return a token taken speculatively (the queue turned out to be empty).
    pub fn refund(&self) {
        let mut bucket = self.bucket.lock().unwrap();
        bucket.tokens = (bucket.tokens + 1.0).min(bucket.capacity);
    }
}
