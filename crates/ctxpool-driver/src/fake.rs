//! In-memory `BrowserDriver` test double. No real browser process; used by
//! `ctxpool-core`'s test suite (and this crate's own doctests) so pool
//! behavior can be exercised deterministically without spawning Chrome,
//! the way the teacher's engine-abstraction crate stubs engines for its
//! trait-behavior tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ctxpool_types::{ScrapeRequest, ScrapeResult};

use crate::error::DriverError;
use crate::traits::{BrowserDriver, DriverHandle};

/// A scripted outcome for a single `execute()` call.
#[derive(Clone, Debug)]
pub enum ScriptedOutcome {
    Success,
    DriverError(String),
    TargetClosed,
}

struct FakeContext {
    tags: BTreeSet<String>,
    storage_path: Option<PathBuf>,
}

/// A fake driver whose per-context behavior is scripted in advance.
///
/// Contexts not given an explicit script always succeed. `launch_count`
/// and `new_context_count` let tests assert on restart/recreation behavior
/// without inspecting pool internals.
pub struct FakeDriver {
    contexts: Mutex<HashMap<String, FakeContext>>,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    launch_count: AtomicU64,
    new_context_count: AtomicU64,
    launched: Mutex<bool>,
    last_handle_id: Mutex<Option<String>>,
    active_executions: AtomicU64,
    max_concurrent_executions: AtomicU64,
}

/// Decrements `active_executions` on every exit path out of `execute`,
/// scripted error or not, so the high-water mark it feeds stays accurate.
struct ExecGuard<'a>(&'a AtomicU64);

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            launch_count: AtomicU64::new(0),
            new_context_count: AtomicU64::new(0),
            launched: Mutex::new(false),
            last_handle_id: Mutex::new(None),
            active_executions: AtomicU64::new(0),
            max_concurrent_executions: AtomicU64::new(0),
        }
    }

    /// Queue an outcome for the next `execute()` call keyed by a handle's
    /// string id. Outcomes are consumed FIFO; once exhausted, calls succeed.
    pub fn script(&self, handle_id: &str, outcomes: impl IntoIterator<Item = ScriptedOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(handle_id.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn launch_count(&self) -> u64 {
        self.launch_count.load(Ordering::SeqCst)
    }

    pub fn new_context_count(&self) -> u64 {
        self.new_context_count.load(Ordering::SeqCst)
    }

    /// The handle id most recently returned by `new_context`, for tests
    /// that need to script a context's behavior after minting it through a
    /// higher-level API that doesn't expose the handle itself (e.g.
    /// `ContextPool::create_context`).
    pub fn last_handle_id(&self) -> Option<String> {
        self.last_handle_id.lock().unwrap().clone()
    }

    /// High-water mark of simultaneously in-flight `execute()` calls, across
    /// every handle. Tests use this to catch a pool that dispatches two
    /// scrapes onto one context at once (spec invariant I2): the number
    /// only rises above the count of *distinct* busy contexts if something
    /// double-assigned one of them.
    pub fn max_concurrent_executions(&self) -> u64 {
        self.max_concurrent_executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(&self) -> Result<(), DriverError> {
        self.launch_count.fetch_add(1, Ordering::SeqCst);
        *self.launched.lock().unwrap() = true;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        *self.launched.lock().unwrap() = false;
        self.contexts.lock().unwrap().clear();
        Ok(())
    }

    async fn new_context(
        &self,
        _proxy: Option<&str>,
        storage_path: Option<&Path>,
        tags: &BTreeSet<String>,
    ) -> Result<DriverHandle, DriverError> {
        if !*self.launched.lock().unwrap() {
            return Err(DriverError::TargetClosed);
        }

        self.new_context_count.fetch_add(1, Ordering::SeqCst);
        let handle = DriverHandle::new(uuid::Uuid::new_v4().to_string());
        *self.last_handle_id.lock().unwrap() = Some(handle.0.clone());
        self.contexts.lock().unwrap().insert(
            handle.0.clone(),
            FakeContext {
                tags: tags.clone(),
                storage_path: storage_path.map(Path::to_path_buf),
            },
        );
        Ok(handle)
    }

    async fn close_context(&self, handle: &DriverHandle) -> Result<(), DriverError> {
        self.contexts.lock().unwrap().remove(&handle.0);
        Ok(())
    }

    async fn execute(
        &self,
        handle: &DriverHandle,
        request: &ScrapeRequest,
    ) -> Result<ScrapeResult, DriverError> {
        if !*self.launched.lock().unwrap() {
            return Err(DriverError::TargetClosed);
        }
        if !self.contexts.lock().unwrap().contains_key(&handle.0) {
            return Err(DriverError::other(format!("unknown context handle {handle}")));
        }

        let active = self.active_executions.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_executions.fetch_max(active, Ordering::SeqCst);
        let _guard = ExecGuard(&self.active_executions);
        // Yield so a concurrently scheduled `execute()` against the same
        // handle has a chance to actually interleave instead of this call
        // running to completion atomically on one task poll.
        tokio::task::yield_now().await;

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&handle.0)
            .and_then(VecDeque::pop_front);

        match next {
            Some(ScriptedOutcome::Success) | None => Ok(ScrapeResult::ok(
                handle.0.clone(),
                request.url.clone(),
                Some(200),
            )),
            Some(ScriptedOutcome::DriverError(msg)) => Err(DriverError::Other(msg)),
            Some(ScriptedOutcome::TargetClosed) => Err(DriverError::TargetClosed),
        }
    }
}
