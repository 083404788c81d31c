//! Two-level admission control for LLM calls: a global concurrency
//! semaphore, then a per-provider token bucket refilled lazily from the
//! wall clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default cap on in-flight LLM requests across the process.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;
/// Default per-provider request budget per minute.
pub const DEFAULT_REQUESTS_PER_MINUTE: f64 = 60.0;

const REFILL_INTERVAL: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Holding a permit entitles the owner to one in-flight request; dropping
/// it returns the concurrency slot.
pub struct Permit {
    _slot: OwnedSemaphorePermit,
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            last_refill: Instant::now(),
        }
    }

    /// Tokens accrue continuously: capacity per 60 s, fractional amounts
    /// included, clamped at capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let rate = self.capacity / REFILL_INTERVAL.as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    slots: Arc<Semaphore>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    requests_per_minute: f64,
}

static GLOBAL: OnceLock<RateLimiter> = OnceLock::new();

impl RateLimiter {
    pub fn new(max_concurrent: usize, requests_per_minute: f64) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            buckets: Mutex::new(HashMap::new()),
            requests_per_minute,
        }
    }

    /// The process-wide limiter shared by every transport instance.
    pub fn global() -> &'static RateLimiter {
        GLOBAL.get_or_init(|| {
            RateLimiter::new(DEFAULT_MAX_CONCURRENT, DEFAULT_REQUESTS_PER_MINUTE)
        })
    }

    /// Take one concurrency slot, then wait for a token. Returns `None`
    /// when `cancel` fires while waiting.
    pub async fn acquire(&self, provider: &str, cancel: &CancellationToken) -> Option<Permit> {
        let slot = tokio::select! {
            permit = self.slots.clone().acquire_owned() => {
                // The semaphore is never closed.
                permit.ok()?
            }
            _ = cancel.cancelled() => return None,
        };

        loop {
            if self.take_token(provider) {
                trace!(provider, "rate limit permit acquired");
                return Some(Permit { _slot: slot });
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Non-blocking variant: needs a free slot and a whole token right now.
    pub fn try_acquire(&self, provider: &str) -> Option<Permit> {
        let slot = self.slots.clone().try_acquire_owned().ok()?;
        if self.take_token(provider) {
            Some(Permit { _slot: slot })
        } else {
            // Token miss releases the slot (dropping the permit).
            None
        }
    }

    pub fn available_tokens(&self, provider: &str) -> f64 {
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let bucket = self.bucket_entry(&mut buckets, provider);
        bucket.refill(Instant::now());
        bucket.tokens
    }

    /// How long until one token is available, assuming no other consumers.
    pub fn estimated_wait(&self, provider: &str) -> Duration {
        let tokens = self.available_tokens(provider);
        if tokens >= 1.0 {
            return Duration::ZERO;
        }
        let per_token = REFILL_INTERVAL.as_secs_f64() / self.requests_per_minute;
        Duration::from_secs_f64((1.0 - tokens) * per_token)
    }

    fn take_token(&self, provider: &str) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let bucket = self.bucket_entry(&mut buckets, provider);
        bucket.try_take(Instant::now())
    }

    fn bucket_entry<'a>(
        &self,
        buckets: &'a mut HashMap<String, TokenBucket>,
        provider: &str,
    ) -> &'a mut TokenBucket {
        if !buckets.contains_key(provider) {
            buckets.insert(
                provider.to_string(),
                TokenBucket::new(self.requests_per_minute),
            );
        }
        buckets.get_mut(provider).expect("bucket just inserted")
    }
}
