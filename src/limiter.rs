//! Shared request-rate admission control.
//!
//! One limiter is shared by every executor: an iteration may only start
//! after drawing a token. The bucket refills at the configured rate and
//! holds at most one second's worth of tokens, so a freshly configured
//! limiter admits a full burst and then settles into the steady rate. The
//! supervisor re-applies the phase rate on every tick, and waiting acquirers
//! observe rate changes the next time they wake.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::shutdown::ShutdownWatch;
use crate::workflow::RunError;

/// Token bucket limiting how many iterations may start per second.
///
/// A rate of 0 means unbounded: acquire returns immediately.
pub struct RateLimiter {
    state: Mutex<Bucket>,
}

struct Bucket {
    /// Permits per second; also the bucket capacity.
    rate: usize,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        if self.rate == 0 {
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate as f64).min(self.rate as f64);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Create a limiter admitting `rps` iteration starts per second.
    ///
    /// The bucket starts full: up to `rps` permits are available in the
    /// first moment, then `rps` per second.
    pub fn new(rps: usize) -> RateLimiter {
        RateLimiter {
            state: Mutex::new(Bucket {
                rate: rps,
                tokens: rps as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// The currently configured rate, 0 when unbounded.
    pub fn rate(&self) -> usize {
        self.state.lock().unwrap().rate
    }

    /// Atomically change the rate; burst capacity follows the new rate.
    pub fn set_rate(&self, rps: usize) {
        let mut bucket = self.state.lock().unwrap();
        if bucket.rate == rps {
            // The supervisor re-applies the rate every tick.
            return;
        }
        let now = Instant::now();
        bucket.refill(now);
        if bucket.rate == 0 {
            // Leaving unbounded mode behaves like a fresh limiter.
            bucket.tokens = rps as f64;
        } else {
            bucket.tokens = bucket.tokens.min(rps as f64);
        }
        bucket.rate = rps;
        debug!("rate limiter set to {} rps", rps);
    }

    /// Draw one permit, suspending until it is available or the scope
    /// shuts down.
    pub async fn acquire(&self, shutdown: &ShutdownWatch) -> Result<(), RunError> {
        loop {
            let wait = {
                let mut bucket = self.state.lock().unwrap();
                if bucket.rate == 0 {
                    return Ok(());
                }
                bucket.refill(Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                // Sleep for exactly the deficit, then re-check: the rate may
                // have changed while waiting.
                Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate as f64)
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.wait() => return Err(RunError::Cancelled),
            }
        }
    }
}
