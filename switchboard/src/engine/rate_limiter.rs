use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Token state shared by the global and keyed limiters.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(max_tokens: u32, now: Instant) -> Self {
        Self {
            tokens: max_tokens as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant, refill_rate: f64, max_tokens: u32) {
        if refills(refill_rate) {
            let elapsed = now.duration_since(self.last_refill).as_secs_f64();
            self.tokens = (self.tokens + elapsed * refill_rate).min(max_tokens as f64);
        }
        self.last_refill = now;
    }

    /// Take a token, or return how long until one is available
    /// (`Duration::MAX` when the bucket never refills).
    fn take(&mut self, refill_rate: f64) -> Result<(), Duration> {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if !refills(refill_rate) {
            Err(Duration::MAX)
        } else {
            Err(Duration::try_from_secs_f64((1.0 - self.tokens) / refill_rate)
                .unwrap_or(Duration::MAX))
        }
    }
}

/// Zero, negative and non-finite rates never refill.
fn refills(refill_rate: f64) -> bool {
    refill_rate.is_finite() && refill_rate > 0.0
}

/// Whether waiting `wait` from now would pass `deadline`.
fn past_deadline(wait: Duration, deadline: Instant) -> bool {
    Instant::now()
        .checked_add(wait)
        .is_none_or(|ready| ready > deadline)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Burst capacity for a per-second rate: the rate rounded up, at least one.
fn burst_for(per_second: f64) -> u32 {
    (per_second.ceil() as u32).max(1)
}

/// Single token bucket, used as a process-wide limit (e.g. error reports).
pub struct TokenBucket {
    bucket: Mutex<Bucket>,
    max_tokens: u32,
    refill_rate: f64, // tokens per second
}

impl TokenBucket {
    /// Initially full; refilled at `per_second` tokens per second with a burst
    /// of `ceil(per_second)`.
    pub fn per_second(per_second: f64) -> Self {
        let max_tokens = burst_for(per_second);
        Self {
            bucket: Mutex::new(Bucket::full(max_tokens, Instant::now())),
            max_tokens,
            refill_rate: per_second,
        }
    }

    /// Returns true if the event may happen now.
    pub fn check(&self) -> bool {
        self.try_take().is_ok()
    }

    /// Wait for a token, giving up (false) when one would not be available
    /// before `deadline`.
    pub async fn wait_until(&self, deadline: Instant) -> bool {
        loop {
            match self.try_take() {
                Ok(()) => return true,
                Err(wait) => {
                    if past_deadline(wait, deadline) {
                        return false;
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = lock(&self.bucket);
        bucket.refill(Instant::now(), self.refill_rate, self.max_tokens);
        bucket.take(self.refill_rate)
    }
}

/// Token-bucket rate limiter keyed by string (channel id, user id, etc.).
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    max_tokens: u32,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    /// Create a rate limiter.
    /// - `max_tokens`: burst capacity
    /// - `per_seconds`: refill one token every N seconds
    pub fn new(max_tokens: u32, per_seconds: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_tokens,
            refill_rate: 1.0 / per_seconds,
        }
    }

    /// `per_second` events per second per key, burst of `ceil(per_second)`.
    pub fn per_second(per_second: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_tokens: burst_for(per_second),
            refill_rate: per_second,
        }
    }

    /// Check if an action is allowed for the given key. Returns true if allowed.
    pub fn check(&self, key: &str) -> bool {
        self.try_take(key).is_ok()
    }

    /// Wait for a token for `key`, giving up (false) when one would not be
    /// available before `deadline`.
    pub async fn wait_until(&self, key: &str, deadline: Instant) -> bool {
        loop {
            match self.try_take(key) {
                Ok(()) => return true,
                Err(wait) => {
                    if past_deadline(wait, deadline) {
                        return false;
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn try_take(&self, key: &str) -> Result<(), Duration> {
        let mut buckets = lock(&self.buckets);
        let now = Instant::now();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(self.max_tokens, now));
        bucket.refill(now, self.refill_rate, self.max_tokens);
        bucket.take(self.refill_rate)
    }

    /// Remove stale entries older than the given duration.
    pub fn cleanup(&self, older_than: Duration) {
        let mut buckets = lock(&self.buckets);
        let cutoff = Instant::now() - older_than;
        buckets.retain(|_, b| b.last_refill > cutoff);
    }
}
