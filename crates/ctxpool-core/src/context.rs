//! Context lifecycle state (spec §4.4).

use std::collections::BTreeSet;
use std::fmt;

use ctxpool_driver::DriverHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::rate_limiter::RateLimiter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextStatus {
    Idle,
    Busy,
    /// Torn down mid-restart; not selectable, waiting to be recreated.
    BrowserRestarting,
}

/// One isolated browser context tracked by the pool.
///
/// `driver_handle` is `None` only in the brief window between admission and
/// the driver confirming creation, and again while `status` is
/// `BrowserRestarting`.
pub struct Context {
    pub id: Uuid,
    pub tags: BTreeSet<String>,
    pub proxy: Option<String>,
    pub persistent: bool,
    pub status: ContextStatus,
    pub created_at: Instant,
    pub last_used: Instant,
    pub consecutive_errors: u32,
    pub total_requests: u64,
    pub total_errors: u64,
    pub driver_handle: Option<DriverHandle>,
    rate_limiter: RateLimiter,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("status", &self.status)
            .field("consecutive_errors", &self.consecutive_errors)
            .field("total_requests", &self.total_requests)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(tags: BTreeSet<String>, proxy: Option<String>, persistent: bool, now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            tags,
            proxy,
            persistent,
            status: ContextStatus::Idle,
            created_at: now,
            last_used: now,
            consecutive_errors: 0,
            total_requests: 0,
            total_errors: 0,
            driver_handle: None,
            rate_limiter: RateLimiter::new(),
        }
    }

    #[cfg(test)]
    pub fn new_for_test(tags: BTreeSet<String>) -> Self {
        Self::new(tags, None, false, Instant::now())
    }

    /// Reconstructs a context with a caller-supplied id: used when restoring
    /// a persistent context from its `<id>.meta.json` sidecar (spec §6),
    /// where the whole point is that the id survives the process restart.
    pub fn restore(id: Uuid, tags: BTreeSet<String>, proxy: Option<String>, now: Instant) -> Self {
        let mut ctx = Self::new(tags, proxy, true, now);
        ctx.id = id;
        ctx
    }

    pub fn busy(&self) -> bool {
        matches!(self.status, ContextStatus::Busy | ContextStatus::BrowserRestarting)
    }

    pub fn is_ready_for(&self, domain: &str, now: Instant) -> bool {
        !self.busy() && self.rate_limiter.is_ready(domain, now)
    }

    pub fn next_available(&self, domain: &str) -> Option<Instant> {
        self.rate_limiter.next_available(domain)
    }

    /// Records a successful dispatch: resets the error streak and bumps
    /// the request counter.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.total_requests += 1;
    }

    /// Marks a domain as used, spacing out the next request to it.
    pub fn mark_domain_used(&mut self, domain: &str, now: Instant, delay: std::time::Duration) {
        self.rate_limiter.mark_used(domain, now, delay);
    }

    /// Records a failed dispatch that counts against context health
    /// (spec §4.4 `release`, `PoolError::counts_as_context_error`).
    pub fn record_error(&mut self) {
        self.consecutive_errors += 1;
        self.total_errors += 1;
        self.total_requests += 1;
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_used = now;
    }
}
