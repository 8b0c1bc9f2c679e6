//! Per-context, per-domain request spacing (spec §4.1).
//!
//! Deliberately not built on `governor`'s token bucket: the pool needs to
//! *query* the next permitted instant ahead of deciding whether a context
//! is a usable candidate, not merely ask "may I proceed now". A plain map
//! of last-used timestamps gives that query for free.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use url::Url;

/// Tracks, per registrable domain, the instant a context is next allowed
/// to make a request. One `RateLimiter` lives inside each `Context`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    next_allowed: HashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            next_allowed: HashMap::new(),
        }
    }

    /// Extracts the host to key rate limiting on. Falls back to the full
    /// URL string for inputs `url` can't parse, so a malformed URL still
    /// gets *some* spacing rather than bypassing the limiter entirely.
    pub fn domain_key(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string())
    }

    /// Earliest instant a request to `domain` may be dispatched from this
    /// context. `None` if the domain has never been used.
    pub fn next_available(&self, domain: &str) -> Option<Instant> {
        self.next_allowed.get(domain).copied()
    }

    /// Whether `domain` may be used right now.
    pub fn is_ready(&self, domain: &str, now: Instant) -> bool {
        self.next_available(domain).is_none_or(|t| now >= t)
    }

    /// Records a use of `domain` at `now`, pushing its next-allowed instant
    /// forward by `delay`.
    pub fn mark_used(&mut self, domain: &str, now: Instant, delay: Duration) {
        self.next_allowed.insert(domain.to_string(), now + delay);
    }
}
