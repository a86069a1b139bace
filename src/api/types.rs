//! Shared types for the edge layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::remote_store::RemoteStore;

/// Requests allowed per client per window.
const REQUESTS_PER_WINDOW: u32 = 60;
/// Window length in seconds.
const WINDOW_SECS: u64 = 60;

/// User-agent prefix length used in the rate key. Long enough to separate
/// real clients, short enough that junk UA tails don't explode the keyspace.
const UA_PREFIX_CHARS: usize = 32;

/// Verified-crawler markers exempt from rate limiting.
const CRAWLER_MARKERS: &[&str] = &[
    "googlebot",
    "bingbot",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "facebookexternalhit",
    "twitterbot",
    "linkedinbot",
    "whatsapp",
];

/// Whether a user-agent belongs to a known crawler.
pub fn is_crawler(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    CRAWLER_MARKERS.iter().any(|marker| ua.contains(marker))
}

// ═══════════════════════════════════════════════════════════
// API context — shared state for the edge router
// ═══════════════════════════════════════════════════════════

/// Shared context for all routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub store: Arc<RemoteStore>,
    pub rate_limiter: Arc<Mutex<FixedWindowLimiter>>,
}

impl ApiContext {
    pub fn new(store: Arc<RemoteStore>) -> Self {
        Self {
            store,
            rate_limiter: Arc::new(Mutex::new(FixedWindowLimiter::new())),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Fixed-window rate limiter
// ═══════════════════════════════════════════════════════════

struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window request counter keyed on (client address, UA prefix).
///
/// The window does not slide: the first request opens it, and the count
/// resets exactly `WINDOW_SECS` later. Over-limit callers are told to retry
/// after a full window regardless of how far into the current one they are.
pub struct FixedWindowLimiter {
    windows: HashMap<(String, String), Window>,
    max_requests: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::with_limits(REQUESTS_PER_WINDOW, Duration::from_secs(WINDOW_SECS))
    }

    pub fn with_limits(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: HashMap::new(),
            max_requests,
            window,
        }
    }

    /// Count one request. Returns `Err(retry_after_secs)` when over limit.
    pub fn check(&mut self, client_ip: &str, user_agent: &str) -> Result<(), u64> {
        let now = Instant::now();

        // Opportunistic cleanup so dead windows don't accumulate
        if self.windows.len() > 10_000 {
            let window = self.window;
            self.windows.retain(|_, w| now.duration_since(w.started_at) < window);
        }

        let key = (
            client_ip.to_string(),
            user_agent.chars().take(UA_PREFIX_CHARS).collect(),
        );
        let entry = self.windows.entry(key).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            return Err(WINDOW_SECS);
        }
        entry.count += 1;
        Ok(())
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}
