//! Small TTL cache for per-user preference and plan lookups.
//!
//! Plan tier and usage counters come from the billing backend; callers cache
//! the last answer here so routine checks don't pay a round trip. Staleness
//! is bounded by the TTL and any mutation path calls `invalidate`.

use std::time::{Duration, Instant};

/// Time-bounded single-value cache.
#[derive(Debug)]
pub struct PrefsCache<T> {
    entry: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T> PrefsCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// The cached value, if one was stored within the TTL as of `now`.
    pub fn get(&self, now: Instant) -> Option<&T> {
        match &self.entry {
            Some((value, fetched_at)) if now.duration_since(*fetched_at) < self.ttl => Some(value),
            _ => None,
        }
    }

    pub fn put(&mut self, value: T, now: Instant) {
        self.entry = Some((value, now));
    }

    /// Drop the cached value so the next read refetches.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}
