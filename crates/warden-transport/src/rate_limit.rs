//! Token-bucket admission control for the webhook.

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Refilling token bucket shared by all webhook requests.
///
/// Holds up to `burst` tokens and regains `per_second` tokens per second.
/// Each admitted request spends one token.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<Bucket>,
}

impl TokenBucket {
    /// Returns `None` when either parameter is zero, meaning "unlimited".
    pub fn new(per_second: f64, burst: u32) -> Option<Self> {
        if burst == 0 || per_second <= 0.0 {
            return None;
        }
        Some(Self {
            capacity: f64::from(burst),
            refill_per_sec: per_second,
            state: Mutex::new(Bucket {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        })
    }

    /// Spends a token if one is available.
    pub fn allow(&self) -> bool {
        let mut bucket = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last = now;
        }
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
