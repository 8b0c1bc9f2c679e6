//! The pool manager (spec §4.5): admission control, context selection,
//! queueing, and whole-browser crash recovery, all behind one
//! externally controlled [`BrowserDriver`].
//!
//! Mirrors the shape of the teacher's `BrowserPool` (one big struct behind
//! an `Arc`, internal state behind `tokio::sync::Mutex`, a background
//! maintenance loop) but replaces "grow/shrink a fleet of browser
//! processes" with "multiplex contexts inside one browser process".
//!
//! `contexts` and `queue` live behind one `tokio::sync::Mutex` (spec §5:
//! "one mutex protecting `contexts`, `queue`, `generation`, and rate-limit
//! tables; all selection decisions are taken under it") rather than two
//! separate locks, so there is exactly one acquisition order to reason
//! about. Scalar counters stay in independent atomics, which never
//! participate in a lock-ordering problem.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ctxpool_driver::{BrowserDriver, DriverError};
use ctxpool_types::{satisfies, PoolError, ScrapeRequest, ScrapeResult, PROTECTED_TAG};
use tokio::sync::Mutex;
use tokio::time::timeout as tokio_timeout;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{self, PoolConfig};
use crate::context::{Context, ContextStatus};
use crate::eviction::{pick_eviction_candidate, score};
use crate::persistence::{self, ContextMeta};
use crate::queue::RequestQueue;
use crate::rate_limiter::RateLimiter;

/// Snapshot of pool-wide counters (spec §6.1 `GET /stats`).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    pub total_contexts: usize,
    pub idle_contexts: usize,
    pub busy_contexts: usize,
    pub queue_depth: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub restarts: u64,
    pub degraded: bool,
}

/// Everything selection touches, behind the pool's single mutex.
struct PoolState {
    contexts: Vec<Context>,
    queue: RequestQueue,
}

struct Inner {
    state: Mutex<PoolState>,
    /// Bumped on every whole-browser restart. A dispatch that started under
    /// an older generation is abandoned rather than retried against a
    /// browser it no longer recognizes.
    generation: AtomicU64,
    degraded: AtomicBool,
    /// Set once `shutdown` begins; new `scrape` calls fail fast instead of
    /// racing the teardown (spec §5: "stops accepting new work").
    shutting_down: AtomicBool,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    restarts: AtomicU64,
    /// Fired whenever a context becomes idle, so a caller sleeping on a
    /// rate-limited domain (spec §4.5 step 5) can wake early instead of
    /// always sleeping the full delay.
    context_idle: tokio::sync::Notify,
}

/// The pool manager. Cheap to clone (an `Arc` wrapper), so adapters can hold
/// one per connection without coordinating lifetimes.
#[derive(Clone)]
pub struct ContextPool {
    config: PoolConfig,
    driver: Arc<dyn BrowserDriver>,
    inner: Arc<Inner>,
}

enum Selection {
    /// A context has been picked and already marked `Busy`, atomically with
    /// the decision, under the same lock acquisition (spec §4.5 step 6 /
    /// invariant I2).
    Ready(Uuid),
    /// No ready context, but the pool has room (or an evictable context) to
    /// mint a new one.
    MintNew,
    /// No ready context and no room; caller must queue.
    MustWait,
    /// At least one tag-matching idle context exists but every one is
    /// rate-limited; sleep until the earliest of them frees up (spec §4.5
    /// step 5) rather than minting a new context or queueing.
    WaitRateLimit(Instant),
}

impl ContextPool {
    pub async fn new(config: PoolConfig, driver: Arc<dyn BrowserDriver>) -> Result<Self, PoolError> {
        driver.launch().await.map_err(map_driver_err)?;
        let pool = Self {
            config,
            driver,
            inner: Arc::new(Inner {
                state: Mutex::new(PoolState {
                    contexts: Vec::new(),
                    queue: RequestQueue::new(),
                }),
                generation: AtomicU64::new(0),
                degraded: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                total_requests: AtomicU64::new(0),
                total_errors: AtomicU64::new(0),
                restarts: AtomicU64::new(0),
                context_idle: tokio::sync::Notify::new(),
            }),
        };
        pool.restore_persistent_contexts().await;
        Ok(pool)
    }

    /// Reconstructs every persistent context left over from a prior process
    /// lifetime (spec §6: a `<id>.meta.json` sidecar next to each context's
    /// storage directory). Best-effort: a context whose driver creation
    /// fails is logged and skipped rather than aborting startup.
    async fn restore_persistent_contexts(&self) {
        let metas = persistence::load_all(&self.config.persistent_contexts_path).await;
        if metas.is_empty() {
            return;
        }
        info!(count = metas.len(), "restoring persistent contexts from disk");

        let mut state = self.inner.state.lock().await;
        for meta in metas {
            if state.contexts.len() >= self.config.max_contexts {
                warn!(id = %meta.id, "pool at capacity, not restoring remaining persistent contexts");
                break;
            }
            let storage_path = persistence::storage_dir(&self.config.persistent_contexts_path, meta.id);
            match self
                .driver
                .new_context(meta.proxy.as_deref(), Some(&storage_path), &meta.tags)
                .await
            {
                Ok(handle) => {
                    let mut ctx = Context::restore(meta.id, meta.tags, meta.proxy, Instant::now());
                    ctx.driver_handle = Some(handle);
                    state.contexts.push(ctx);
                }
                Err(e) => {
                    error!(id = %meta.id, error = %e, "failed to restore persistent context, leaving its sidecar in place");
                }
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().await;
        let busy = state.contexts.iter().filter(|c| c.busy()).count();
        PoolStats {
            total_contexts: state.contexts.len(),
            idle_contexts: state.contexts.len() - busy,
            busy_contexts: busy,
            queue_depth: state.queue.len(),
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            total_errors: self.inner.total_errors.load(Ordering::Relaxed),
            restarts: self.inner.restarts.load(Ordering::Relaxed),
            degraded: self.inner.degraded.load(Ordering::Relaxed),
        }
    }

    /// Dispatches one scrape request (spec §4.5). Blocks the caller until
    /// either a context serves it, the request's own timeout elapses, or
    /// the pool is shutting down.
    pub async fn scrape(&self, request: ScrapeRequest) -> Result<ScrapeResult, PoolError> {
        // Two independent bounds (spec §5 "Suspension points"): time spent
        // queued is capped by the pool-wide `max_queue_wait`, while time
        // spent executing once dispatched is capped by the request's own
        // `timeout`. Conflating them would make a request with a short
        // `timeout` fail the queue wait early, or a long one starve the
        // pool-wide queue-timeout guarantee.
        let queue_deadline = Instant::now() + self.config.max_queue_wait;
        let exec_timeout = request.timeout();
        let domain = RateLimiter::domain_key(&request.url);
        let domain_delay = request.domain_delay(self.config.default_domain_delay_ms);

        loop {
            if self.inner.shutting_down.load(Ordering::Relaxed) {
                return Err(PoolError::Shutdown);
            }
            if self.inner.degraded.load(Ordering::Relaxed) {
                return Err(PoolError::BrowserUnavailable);
            }

            let now = Instant::now();
            if now >= queue_deadline {
                return Err(PoolError::QueueTimeout);
            }

            match self
                .select_or_decide(&request.required_tags, &domain, domain_delay, now)
                .await
            {
                Selection::Ready(id) => {
                    return self.dispatch(id, &request, exec_timeout).await;
                }
                Selection::MintNew => match self.mint_context(&request, now).await {
                    Ok(()) => continue, // retry from step 1 (spec §4.5 step 2)
                    Err(PoolError::TargetClosed) => {
                        self.handle_catastrophic_failure().await;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                Selection::WaitRateLimit(until) => {
                    self.wait_until_ready_or_notified(until, queue_deadline).await?;
                    // loop and re-evaluate; rate limit may have cleared
                }
                Selection::MustWait => {
                    self.wait_for_turn(&request.required_tags, &domain, queue_deadline).await?;
                    // loop and re-evaluate; a slot may now be free
                }
            }
        }
    }

    /// Selection algorithm (spec §4.5 steps 1-5): filter by tags, partition
    /// ready vs rate-limited, pick by score with oldest-`last_used`
    /// tie-break. Minting a new context only ever happens when *no*
    /// tag-matching idle context exists at all — if some exist but are all
    /// rate-limited, the caller waits for the rate limit instead (spec step
    /// 5), it never mints around a busy rate limiter.
    ///
    /// The winning context is `assign()`ed (marked `Busy`, rate limiter
    /// stamped) before this function's lock guard drops (spec §4.5 step 6,
    /// invariant I2) — nothing outside this critical section ever observes
    /// the context as idle between "chosen" and "busy".
    async fn select_or_decide(
        &self,
        required_tags: &BTreeSet<String>,
        domain: &str,
        domain_delay: Duration,
        now: Instant,
    ) -> Selection {
        let mut state = self.inner.state.lock().await;

        let mut best: Option<usize> = None;
        let mut any_candidate = false;
        let mut earliest_wait: Option<Instant> = None;

        for (idx, ctx) in state.contexts.iter().enumerate() {
            if !satisfies(&ctx.tags, required_tags) {
                continue;
            }
            any_candidate = true;

            // Busy takes priority over rate-limit bookkeeping: a context
            // that's mid-scrape has nothing useful to report from
            // `next_available` (it may be a stale timestamp from the
            // in-flight dispatch), so it only ever contributes "wait for
            // the idle-notify signal", never a sleep target.
            if ctx.busy() {
                continue;
            }

            if !ctx.is_ready_for(domain, now) {
                if let Some(t) = ctx.next_available(domain) {
                    earliest_wait = Some(earliest_wait.map_or(t, |cur| cur.min(t)));
                }
                continue;
            }

            best = Some(match best {
                None => idx,
                Some(best_idx) => {
                    let s = score(ctx, now);
                    let best_score = score(&state.contexts[best_idx], now);
                    if s > best_score
                        || (s == best_score && ctx.last_used < state.contexts[best_idx].last_used)
                    {
                        idx
                    } else {
                        best_idx
                    }
                }
            });
        }

        if let Some(idx) = best {
            let ctx = &mut state.contexts[idx];
            ctx.status = ContextStatus::Busy;
            ctx.mark_domain_used(domain, now, domain_delay);
            ctx.touch(now);
            return Selection::Ready(ctx.id);
        }

        if any_candidate {
            // `earliest_wait`, when set, only ever comes from a non-busy
            // rate-limited candidate above, so it's always a legitimate
            // sleep target. When every candidate is busy instead (nothing
            // to sleep *until*), fall back to the idle-notify wakeup with a
            // generous poll so a missed notify can't wedge the wait past
            // the queue deadline.
            let target = earliest_wait.unwrap_or_else(|| now + Duration::from_secs(30));
            return Selection::WaitRateLimit(target);
        }

        if state.contexts.len() < self.config.max_contexts {
            return Selection::MintNew;
        }

        // At capacity: minting is still possible if something is evictable.
        if pick_eviction_candidate(state.contexts.iter(), now).is_some() {
            return Selection::MintNew;
        }

        // No capacity and (per spec §9 Open Question 2) a tag-unsatisfiable
        // request never fails outright — it queues like anything else.
        Selection::MustWait
    }

    /// Sleeps until a rate-limited domain clears or a different context
    /// becomes idle, whichever comes first (spec §4.5 step 5), bounded by
    /// the overall queue deadline.
    async fn wait_until_ready_or_notified(&self, until: Instant, queue_deadline: Instant) -> Result<(), PoolError> {
        let now = Instant::now();
        if now >= queue_deadline {
            return Err(PoolError::QueueTimeout);
        }
        let target = until.min(queue_deadline);
        let notified = self.inner.context_idle.notified();
        tokio::select! {
            _ = tokio::time::sleep_until(target) => {}
            _ = notified => {}
        }
        if Instant::now() >= queue_deadline {
            return Err(PoolError::QueueTimeout);
        }
        Ok(())
    }

    /// Creates (and, if the pool is full, first evicts to make room for) a
    /// new context, then inserts it `Idle` — never touching `Busy` here.
    /// Spec §4.5 step 2: "release the lock while the driver creates it,
    /// then retry from step 1." The caller loops back into
    /// `select_or_decide`, which is the *only* place a context is ever
    /// marked busy, closing the TOCTOU window a captured `Vec` index or
    /// returned handle would otherwise open between "minted" and
    /// "assigned".
    async fn mint_context(&self, request: &ScrapeRequest, now: Instant) -> Result<(), PoolError> {
        let victim_handle = {
            let mut state = self.inner.state.lock().await;
            if state.contexts.len() >= self.config.max_contexts {
                match pick_eviction_candidate(state.contexts.iter(), now).map(|c| c.id) {
                    Some(victim_id) => {
                        let pos = state.contexts.iter().position(|c| c.id == victim_id).unwrap();
                        let victim = state.contexts.remove(pos);
                        debug!(context_id = %victim.id, "evicting context to make room");
                        victim.driver_handle
                    }
                    None => return Err(PoolError::PoolFull),
                }
            } else {
                None
            }
        };

        if let Some(handle) = &victim_handle {
            if let Err(e) = self.driver.close_context(handle).await {
                warn!(error = %e, "error closing evicted context");
            }
        }

        let mut ctx = Context::new(request.required_tags.clone(), request.proxy.clone(), request.persistent, now);

        let storage_path = request
            .persistent
            .then(|| persistence::storage_dir(&self.config.persistent_contexts_path, ctx.id));
        let handle = self
            .driver
            .new_context(request.proxy.as_deref(), storage_path.as_deref(), &request.required_tags)
            .await
            .map_err(map_driver_err)?;

        if request.persistent {
            let meta = ContextMeta::new(ctx.id, request.proxy.clone(), request.required_tags.clone());
            if let Err(e) = persistence::write_meta(&self.config.persistent_contexts_path, &meta).await {
                warn!(context_id = %ctx.id, error = %e, "failed to write persistent context meta sidecar");
            }
        }

        ctx.driver_handle = Some(handle);
        {
            let mut state = self.inner.state.lock().await;
            state.contexts.push(ctx);
        }
        self.inner.context_idle.notify_waiters();
        Ok(())
    }

    async fn dispatch(
        &self,
        id: Uuid,
        request: &ScrapeRequest,
        exec_timeout: Duration,
    ) -> Result<ScrapeResult, PoolError> {
        let (handle, generation) = {
            let state = self.inner.state.lock().await;
            let handle = state
                .contexts
                .iter()
                .find(|c| c.id == id)
                .and_then(|c| c.driver_handle.clone());
            (handle, self.inner.generation.load(Ordering::Relaxed))
        };

        let Some(handle) = handle else {
            self.release(id, false).await;
            return Err(PoolError::BrowserRestarting);
        };

        let outcome = tokio_timeout(exec_timeout, self.driver.execute(&handle, request)).await;

        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);

        // Classification of the failure (if any) is delegated to
        // `PoolError::counts_as_context_error` (spec §4.4 `release`) rather
        // than duplicating the success/error judgment call inline.
        let result = match outcome {
            Err(_elapsed) => {
                let err = PoolError::ScrapeTimeout;
                self.inner.total_errors.fetch_add(1, Ordering::Relaxed);
                self.release(id, err.counts_as_context_error()).await;
                return Err(err);
            }
            Ok(Err(DriverError::TargetClosed)) => {
                let err = PoolError::TargetClosed;
                self.inner.total_errors.fetch_add(1, Ordering::Relaxed);
                self.release(id, err.counts_as_context_error()).await;
                if generation == self.inner.generation.load(Ordering::Relaxed) {
                    self.handle_catastrophic_failure().await;
                }
                return Err(err);
            }
            Ok(Err(DriverError::Other(msg))) => {
                let err = PoolError::DriverError(msg);
                self.inner.total_errors.fetch_add(1, Ordering::Relaxed);
                self.release(id, err.counts_as_context_error()).await;
                return Err(err);
            }
            Ok(Ok(result)) => result,
        };

        self.release(id, !result.success).await;
        Ok(result)
    }

    async fn release(&self, id: Uuid, was_error: bool) {
        let mut recreate_id = None;
        {
            let mut state = self.inner.state.lock().await;
            let PoolState { contexts, queue } = &mut *state;
            let Some(ctx) = contexts.iter_mut().find(|c| c.id == id) else {
                return;
            };
            if was_error {
                ctx.record_error();
            } else {
                ctx.record_success();
            }
            ctx.status = ContextStatus::Idle;
            let over_threshold = ctx.consecutive_errors >= self.config.max_consecutive_errors;
            if over_threshold {
                ctx.status = ContextStatus::BrowserRestarting;
                recreate_id = Some(ctx.id);
            }

            let now = Instant::now();
            queue.try_wake(|required_tags, domain| {
                contexts.iter().any(|c| satisfies(&c.tags, required_tags) && c.is_ready_for(domain, now))
            });
        }

        if let Some(context_id) = recreate_id {
            self.recreate_context(context_id).await;
        }

        self.inner.context_idle.notify_waiters();
    }

    /// A context that exceeded `max_consecutive_errors` (spec §4.4): close
    /// and replace it with a fresh one carrying the same tags/proxy, rather
    /// than tearing down the whole browser.
    async fn recreate_context(&self, context_id: Uuid) {
        warn!(%context_id, "context exceeded consecutive error threshold, recreating");

        let (tags, proxy, persistent, old_handle) = {
            let state = self.inner.state.lock().await;
            let Some(ctx) = state.contexts.iter().find(|c| c.id == context_id) else {
                return;
            };
            (ctx.tags.clone(), ctx.proxy.clone(), ctx.persistent, ctx.driver_handle.clone())
        };

        if let Some(handle) = old_handle {
            let _ = self.driver.close_context(&handle).await;
        }

        // Spec §3 invariant I6: recreation starts with an empty rate-limit
        // table — that comes for free here since a fresh `Context` carries
        // its own new `RateLimiter`, never the old one's.
        let storage_path = persistent.then(|| persistence::storage_dir(&self.config.persistent_contexts_path, context_id));
        let new_handle = match self
            .driver
            .new_context(proxy.as_deref(), storage_path.as_deref(), &tags)
            .await
        {
            Ok(h) => h,
            Err(e) => {
                error!(%context_id, error = %e, "failed to recreate context, dropping it");
                let mut state = self.inner.state.lock().await;
                state.contexts.retain(|c| c.id != context_id);
                return;
            }
        };

        {
            let mut state = self.inner.state.lock().await;
            if let Some(pos) = state.contexts.iter().position(|c| c.id == context_id) {
                let now = Instant::now();
                let mut fresh = Context::restore(context_id, tags, proxy, now);
                fresh.persistent = persistent;
                fresh.driver_handle = Some(new_handle);
                state.contexts[pos] = fresh;
            }
        }
        self.inner.context_idle.notify_waiters();
    }

    /// Whole-browser restart protocol (spec §4.5 step 5): bump the
    /// generation so in-flight dispatches from the old browser are
    /// abandoned, drain the queue, tear down and relaunch the browser, then
    /// re-create every context whose `persistent=true` (transient contexts
    /// are dropped — spec invariant I5).
    async fn handle_catastrophic_failure(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.restarts.fetch_add(1, Ordering::Relaxed);
        error!("browser process appears to have crashed, restarting");

        let survivors: Vec<(Uuid, BTreeSet<String>, Option<String>)> = {
            let mut state = self.inner.state.lock().await;
            let survivors = state
                .contexts
                .iter()
                .filter(|c| c.persistent)
                .map(|c| (c.id, c.tags.clone(), c.proxy.clone()))
                .collect();
            state.queue.fail_all(PoolError::BrowserRestarting);
            state.contexts.clear();
            survivors
        };

        let _ = self.driver.shutdown().await;

        let mut relaunched = false;
        for attempt in 0..config::RESTART_MAX_ATTEMPTS {
            match self.driver.launch().await {
                Ok(()) => {
                    info!(attempt, "browser restarted successfully");
                    relaunched = true;
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "browser relaunch attempt failed");
                    tokio::time::sleep(config::restart_backoff(attempt)).await;
                }
            }
        }

        if !relaunched {
            error!("exhausted browser restart attempts, pool is degraded");
            self.inner.degraded.store(true, Ordering::Relaxed);
            return;
        }

        self.inner.degraded.store(false, Ordering::Relaxed);

        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        for (id, tags, proxy) in survivors {
            let storage_path = persistence::storage_dir(&self.config.persistent_contexts_path, id);
            match self.driver.new_context(proxy.as_deref(), Some(&storage_path), &tags).await {
                Ok(handle) => {
                    let mut ctx = Context::restore(id, tags, proxy, now);
                    ctx.driver_handle = Some(handle);
                    state.contexts.push(ctx);
                }
                Err(e) => {
                    error!(%id, error = %e, "failed to re-create persistent context after restart");
                }
            }
        }
        drop(state);
        self.inner.context_idle.notify_waiters();
    }

    async fn wait_for_turn(
        &self,
        required_tags: &BTreeSet<String>,
        domain: &str,
        deadline: Instant,
    ) -> Result<(), PoolError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(PoolError::QueueTimeout);
        }

        let (id, rx) = {
            let mut state = self.inner.state.lock().await;
            // Spec §4.3: "fails immediately with PoolFull if the queue
            // length plus |contexts| exceeds a configured cap."
            if state.queue.len() + state.contexts.len() > self.config.queue_cap() {
                return Err(PoolError::PoolFull);
            }
            state.queue.enqueue(required_tags.clone(), domain.to_string(), now, deadline)
        };

        match tokio_timeout(deadline.saturating_duration_since(now), rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_recv_error)) => Err(PoolError::Shutdown),
            Err(_elapsed) => {
                self.inner.state.lock().await.queue.cancel(id);
                Err(PoolError::QueueTimeout)
            }
        }
    }

    /// Explicitly mints a context outside the request-dispatch path (spec
    /// §6.1 `POST /contexts`). Subject to the same admission control as an
    /// on-demand mint: evicts if at capacity and something is evictable,
    /// otherwise fails with `PoolFull`.
    pub async fn create_context(
        &self,
        tags: BTreeSet<String>,
        proxy: Option<String>,
        persistent: bool,
    ) -> Result<Uuid, PoolError> {
        let now = Instant::now();

        let victim_handle = {
            let mut state = self.inner.state.lock().await;
            if state.contexts.len() >= self.config.max_contexts {
                match pick_eviction_candidate(state.contexts.iter(), now).map(|c| c.id) {
                    Some(victim_id) => {
                        let pos = state.contexts.iter().position(|c| c.id == victim_id).unwrap();
                        state.contexts.remove(pos).driver_handle
                    }
                    None => return Err(PoolError::PoolFull),
                }
            } else {
                None
            }
        };

        if let Some(handle) = &victim_handle {
            let _ = self.driver.close_context(handle).await;
        }

        let mut ctx = Context::new(tags.clone(), proxy.clone(), persistent, now);

        let storage_path = persistent.then(|| persistence::storage_dir(&self.config.persistent_contexts_path, ctx.id));
        let handle = self
            .driver
            .new_context(proxy.as_deref(), storage_path.as_deref(), &tags)
            .await
            .map_err(map_driver_err)?;

        if persistent {
            let meta = ContextMeta::new(ctx.id, proxy, tags);
            if let Err(e) = persistence::write_meta(&self.config.persistent_contexts_path, &meta).await {
                warn!(context_id = %ctx.id, error = %e, "failed to write persistent context meta sidecar");
            }
        }

        ctx.driver_handle = Some(handle);
        let id = ctx.id;
        {
            let mut state = self.inner.state.lock().await;
            state.contexts.push(ctx);
        }
        self.inner.context_idle.notify_waiters();
        Ok(id)
    }

    /// Destroys a context by id (spec §6.1 `DELETE /contexts/:id`).
    /// Refuses to remove a context mid-request; idempotent for unknown ids.
    pub async fn remove_context(&self, id: Uuid) -> Result<(), PoolError> {
        let ctx = {
            let mut state = self.inner.state.lock().await;
            let Some(pos) = state.contexts.iter().position(|c| c.id == id) else {
                return Ok(());
            };
            if state.contexts[pos].busy() {
                return Err(PoolError::DriverError("context is busy".to_string()));
            }
            state.contexts.remove(pos)
        };
        if let Some(handle) = ctx.driver_handle {
            self.driver.close_context(&handle).await.map_err(map_driver_err)?;
        }
        // Explicit deletion, unlike eviction or a whole-browser restart, is
        // permanent: drop the sidecar so an explicitly destroyed persistent
        // context doesn't come back on the next process restart. Its
        // storage directory itself is left alone (spec §4.4 `destroy`).
        if ctx.persistent {
            persistence::remove_meta(&self.config.persistent_contexts_path, ctx.id).await;
        }
        Ok(())
    }

    /// Merges `tags` into an existing context's tag set (spec §6.1
    /// `POST /contexts/:id/tags`).
    pub async fn add_tags(&self, id: Uuid, tags: BTreeSet<String>) -> Result<(), PoolError> {
        let mut state = self.inner.state.lock().await;
        let Some(ctx) = state.contexts.iter_mut().find(|c| c.id == id) else {
            return Err(PoolError::DriverError("unknown context id".to_string()));
        };
        ctx.tags.extend(tags);
        Ok(())
    }

    /// Periodic sweep dropping queue entries past their deadline (spec
    /// §4.3). Intended to run on an interval from the service crate's
    /// supervisor, the way the teacher's pool runs a tiered health-check
    /// loop.
    pub async fn sweep_expired_waiters(&self) {
        let mut state = self.inner.state.lock().await;
        state.queue.expire_due(Instant::now());
    }

    /// Spec §5: "a shutdown signal flips a flag; the pool stops accepting
    /// new work, cancels all waiters with `Shutdown`, waits for in-flight
    /// scrapes up to a grace period (spec: 30s), then forces
    /// `driver.shutdown()`."
    pub async fn shutdown(&self) {
        info!("shutting down context pool");
        self.inner.shutting_down.store(true, Ordering::Relaxed);
        {
            let mut state = self.inner.state.lock().await;
            state.queue.fail_all(PoolError::Shutdown);
        }

        let deadline = Instant::now() + config::SHUTDOWN_GRACE_PERIOD;
        loop {
            let any_busy = {
                let state = self.inner.state.lock().await;
                state.contexts.iter().any(|c| c.busy())
            };
            if !any_busy {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("shutdown grace period elapsed with scrapes still in flight, forcing close");
                break;
            }
            let notified = self.inner.context_idle.notified();
            let poll = deadline.saturating_duration_since(now).min(Duration::from_millis(200));
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = notified => {}
            }
        }

        let handles: Vec<_> = {
            let state = self.inner.state.lock().await;
            state.contexts.iter().filter_map(|c| c.driver_handle.clone()).collect()
        };
        for handle in handles {
            let _ = self.driver.close_context(&handle).await;
        }
        let _ = self.driver.shutdown().await;
    }
}

fn map_driver_err(e: DriverError) -> PoolError {
    match e {
        DriverError::TargetClosed => PoolError::TargetClosed,
        DriverError::Other(msg) => PoolError::DriverError(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxpool_driver::FakeDriver;
    use ctxpool_types::WaitUntil;

    fn config(max_contexts: usize) -> PoolConfig {
        PoolConfig {
            max_contexts,
            default_domain_delay_ms: 1000,
            max_queue_wait: Duration::from_secs(5),
            max_consecutive_errors: 3,
            persistent_contexts_path: "/tmp".into(),
        }
    }

    fn request(url: &str) -> ScrapeRequest {
        ScrapeRequest {
            url: url.to_string(),
            required_tags: BTreeSet::new(),
            proxy: None,
            domain_delay_ms: None,
            wait_for: WaitUntil::Load,
            timeout_ms: 5000,
            get_content: false,
            script: None,
            screenshot: false,
            block_resources: true,
            persistent: false,
        }
    }

    #[tokio::test]
    async fn first_request_mints_a_context() {
        let driver = Arc::new(FakeDriver::new());
        let pool = ContextPool::new(config(5), driver.clone()).await.unwrap();
        let result = pool.scrape(request("https://a.example/")).await.unwrap();
        assert!(result.success);
        assert_eq!(driver.new_context_count(), 1);
    }

    #[tokio::test]
    async fn reuses_idle_context_for_different_domain() {
        let driver = Arc::new(FakeDriver::new());
        let pool = ContextPool::new(config(5), driver.clone()).await.unwrap();
        pool.scrape(request("https://a.example/")).await.unwrap();
        pool.scrape(request("https://b.example/")).await.unwrap();
        assert_eq!(driver.new_context_count(), 1);
    }

    /// Spec §8 scenario 1 and §4.5 step 5: a rate-limited domain makes the
    /// caller wait for the *same* context rather than minting a second one
    /// around the limiter, even when the pool has spare capacity.
    #[tokio::test(start_paused = true)]
    async fn rate_limit_delays_reuse_instead_of_minting_a_second_context() {
        let driver = Arc::new(FakeDriver::new());
        let pool = ContextPool::new(config(5), driver.clone()).await.unwrap();

        let mut first = request("https://a.example/");
        first.domain_delay_ms = Some(100);
        let t0 = tokio::time::Instant::now();
        pool.scrape(first).await.unwrap();

        let mut second = request("https://a.example/");
        second.domain_delay_ms = Some(100);
        let result = pool.scrape(second).await.unwrap();
        let elapsed = t0.elapsed();

        assert!(result.success);
        assert_eq!(driver.new_context_count(), 1);
        assert!(elapsed >= Duration::from_millis(100), "elapsed={elapsed:?}");
    }

    #[tokio::test]
    async fn tag_required_context_is_minted_when_none_exists() {
        let driver = Arc::new(FakeDriver::new());
        let pool = ContextPool::new(config(5), driver.clone()).await.unwrap();
        let mut req = request("https://a.example/");
        req.required_tags = ["premium".to_string()].into_iter().collect();
        let result = pool.scrape(req).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_full_with_no_evictable_context_queues_then_times_out() {
        let mut cfg = config(1);
        cfg.max_queue_wait = Duration::from_millis(50);
        let driver = Arc::new(FakeDriver::new());
        let pool = ContextPool::new(cfg, driver.clone()).await.unwrap();

        // Fill the one slot with a protected context.
        let mut protected_req = request("https://a.example/");
        protected_req.required_tags = [PROTECTED_TAG.to_string()].into_iter().collect();
        pool.scrape(protected_req).await.unwrap();

        // This request can't be served by the protected context (tag
        // mismatch) and there's no room to mint another (protected is never
        // evictable), so it must queue and then time out against
        // `max_queue_wait`, not the request's own (much longer) `timeout`.
        let mut req = request("https://b.example/");
        req.required_tags = ["unrelated".to_string()].into_iter().collect();
        let err = pool.scrape(req).await.unwrap_err();
        assert!(matches!(err, PoolError::QueueTimeout));
    }

    /// Spec §8 scenario 3: a request's own `timeout` must not bound its
    /// queue wait — only `max_queue_wait` does.
    #[tokio::test(start_paused = true)]
    async fn queue_wait_is_bounded_by_pool_config_not_request_timeout() {
        let mut cfg = config(1);
        cfg.max_queue_wait = Duration::from_millis(50);
        let driver = Arc::new(FakeDriver::new());
        let pool = ContextPool::new(cfg, driver.clone()).await.unwrap();

        let mut protected_req = request("https://a.example/");
        protected_req.required_tags = [PROTECTED_TAG.to_string()].into_iter().collect();
        pool.scrape(protected_req).await.unwrap();

        let mut req = request("https://b.example/");
        req.required_tags = ["unrelated".to_string()].into_iter().collect();
        req.timeout_ms = 60_000; // generous request timeout
        let started = tokio::time::Instant::now();
        let err = pool.scrape(req).await.unwrap_err();
        assert!(matches!(err, PoolError::QueueTimeout));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    // The persistent-context-survives-a-restart scenario (spec §8 property
    // P7) and the whole-browser-restart protocol are covered as integration
    // tests in `tests/restart_and_persistence.rs`, the way the teacher
    // splits fast unit coverage from slower cross-component suites.

    /// Spec §8 scenario 4 / property P5: `MAX_CONSECUTIVE_ERRORS` failures in
    /// a row recreate the context (same id, fresh driver handle) rather than
    /// leaving it wedged or tearing down the whole browser.
    #[tokio::test]
    async fn consecutive_driver_errors_trigger_recreation() {
        use ctxpool_driver::ScriptedOutcome;

        let mut cfg = config(5);
        cfg.max_consecutive_errors = 3;
        let driver = Arc::new(FakeDriver::new());
        let pool = ContextPool::new(cfg, driver.clone()).await.unwrap();

        pool.create_context(BTreeSet::new(), None, false)
            .await
            .unwrap();
        let handle = driver.last_handle_id().unwrap();
        driver.script(
            &handle,
            [
                ScriptedOutcome::DriverError("boom 1".into()),
                ScriptedOutcome::DriverError("boom 2".into()),
                ScriptedOutcome::DriverError("boom 3".into()),
            ],
        );

        // Distinct domains per call so the rate limiter never forces an
        // unrelated wait between them; only the scripted errors matter.
        let _ = pool.scrape(request("https://a.example/")).await;
        let _ = pool.scrape(request("https://b.example/")).await;
        let _ = pool.scrape(request("https://c.example/")).await;

        assert_eq!(driver.new_context_count(), 2, "original + recreated context");
        assert_eq!(pool.stats().await.total_contexts, 1);
        assert_eq!(pool.stats().await.restarts, 0, "recreation, not a browser restart");

        // Fourth scrape lands on the freshly recreated handle and succeeds
        // (FakeDriver defaults to success once its script is exhausted).
        let result = pool.scrape(request("https://d.example/")).await.unwrap();
        assert!(result.success);
    }

    /// Spec §8 scenario 6: when the pool is full and a new context is
    /// needed, the `protected` context is never the one evicted — the
    /// transient one is.
    #[tokio::test]
    async fn eviction_never_touches_a_protected_context() {
        let driver = Arc::new(FakeDriver::new());
        let pool = ContextPool::new(config(2), driver.clone()).await.unwrap();

        pool.create_context([PROTECTED_TAG.to_string()].into_iter().collect(), None, false)
            .await
            .unwrap();
        pool.create_context(BTreeSet::new(), None, false)
            .await
            .unwrap();
        assert_eq!(pool.stats().await.total_contexts, 2);
        assert_eq!(driver.new_context_count(), 2);

        // Pool is at capacity (2/2); a request tagged so that neither
        // existing context satisfies it forces an eviction to make room.
        // `protected` can never be the victim, so `transient` must be.
        let mut req = request("https://a.example/");
        req.required_tags = ["needs-new".to_string()].into_iter().collect();
        pool.scrape(req).await.unwrap();

        assert_eq!(pool.stats().await.total_contexts, 2, "transient evicted, needs-new minted");
        assert_eq!(driver.new_context_count(), 3, "protected + original transient + needs-new");

        // The protected context is still present and still serves its tag
        // without minting a fourth context.
        let mut protected_req = request("https://b.example/");
        protected_req.required_tags = [PROTECTED_TAG.to_string()].into_iter().collect();
        let result = pool.scrape(protected_req).await.unwrap();
        assert!(result.success);
        assert_eq!(driver.new_context_count(), 3, "protected context reused, not recreated");
    }

    /// Invariant I2 ("exactly one operation holds a context busy at a
    /// time"), under genuine concurrency. One context is pre-created so
    /// both tasks are forced to contend over it (tags match, so neither can
    /// mint its own — see `select_or_decide`'s mint branch, only reachable
    /// when no tag-matching context exists at all). If `select_or_decide`
    /// could hand the same idle context to both callers before either
    /// marked it busy, `FakeDriver::execute` (which yields mid-call, giving
    /// a real scheduler interleaving a chance to land) would observe two
    /// overlapping calls against the one handle.
    #[tokio::test]
    async fn concurrent_scrapes_never_double_assign_a_context() {
        let driver = Arc::new(FakeDriver::new());
        let pool = Arc::new(ContextPool::new(config(5), driver.clone()).await.unwrap());
        pool.create_context(BTreeSet::new(), None, false).await.unwrap();

        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let mut tasks = Vec::new();
        for i in 0..2 {
            let pool = pool.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                pool.scrape(request(&format!("https://concurrent-{i}.example/"))).await
            }));
        }

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().success {
                successes += 1;
            }
        }
        assert_eq!(successes, 2);
        assert_eq!(driver.new_context_count(), 1, "both scrapes reuse the single pre-created context");
        assert_eq!(
            driver.max_concurrent_executions(),
            1,
            "no two concurrent scrapes ever ran against the same context simultaneously"
        );
    }
}
