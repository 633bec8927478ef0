// =============================================================================
// Token-bucket rate limiter — sequential request pacing for the REST client
// =============================================================================
//
// Bitbank publishes no usage headers, so the client paces itself: each
// request takes one token, tokens refill continuously, and an empty bucket
// makes the caller wait. Calls are sequential within a cycle, so this mostly
// smooths the reconciliation bursts.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            refill_per_sec,
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut s = self.state.lock();
                let elapsed = s.last_refill.elapsed().as_secs_f64();
                s.tokens = (s.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                s.last_refill = Instant::now();

                if s.tokens >= 1.0 {
                    s.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - s.tokens) / self.refill_per_sec,
                    ))
                }
            };

            match wait {
                None => return,
                Some(d) => {
                    trace!(wait_ms = d.as_millis() as u64, "rate limiter waiting");
                    tokio::time::sleep(d).await;
                }
            }
        }
    }

    /// Tokens currently available (diagnostics only).
    pub fn available(&self) -> f64 {
        let mut s = self.state.lock();
        let elapsed = s.last_refill.elapsed().as_secs_f64();
        s.tokens = (s.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        s.last_refill = Instant::now();
        s.tokens
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .finish()
    }
}
