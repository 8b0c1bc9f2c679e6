//! Waiting-request queue (spec §4.3).
//!
//! Requests that can't be served immediately wait here for a context to
//! free up. FIFO within the set of waiters whose tag requirement a given
//! context can satisfy — not global FIFO — since a request requiring a
//! tag no idle context carries must not block one that an idle context can
//! serve right now.

use std::collections::{BTreeSet, VecDeque};

use ctxpool_types::PoolError;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// One request parked in the queue awaiting a context.
pub struct Waiter {
    pub id: Uuid,
    pub required_tags: BTreeSet<String>,
    pub domain: String,
    pub enqueued_at: Instant,
    pub deadline: Instant,
    completion: oneshot::Sender<Result<(), PoolError>>,
}

/// FIFO queue of waiters, partitioned implicitly by tag compatibility at
/// wake time rather than physically at enqueue time — the queue stores one
/// chronological list and `try_wake` scans it in order, which gives FIFO
/// within any given tag partition for free.
#[derive(Default)]
pub struct RequestQueue {
    waiters: VecDeque<Waiter>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Parks a new waiter, returning the receiving half of its completion
    /// signal. The caller awaits this (with its own deadline) to learn when
    /// it's been granted a turn to retry selection.
    pub fn enqueue(
        &mut self,
        required_tags: BTreeSet<String>,
        domain: String,
        now: Instant,
        deadline: Instant,
    ) -> (Uuid, oneshot::Receiver<Result<(), PoolError>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter {
            id,
            required_tags,
            domain,
            enqueued_at: now,
            deadline,
            completion: tx,
        });
        (id, rx)
    }

    /// Wakes the first waiter (in FIFO order) whose tags/domain
    /// `is_eligible` accepts, removing it from the queue. Returns whether
    /// any waiter was woken.
    pub fn try_wake(&mut self, is_eligible: impl Fn(&BTreeSet<String>, &str) -> bool) -> bool {
        let pos = self
            .waiters
            .iter()
            .position(|w| is_eligible(&w.required_tags, &w.domain));
        let Some(pos) = pos else { return false };
        let waiter = self.waiters.remove(pos).unwrap();
        let _ = waiter.completion.send(Ok(()));
        true
    }

    /// Removes and fails every waiter whose deadline has passed.
    pub fn expire_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.waiters.len() {
            if now >= self.waiters[i].deadline {
                let waiter = self.waiters.remove(i).unwrap();
                let _ = waiter.completion.send(Err(PoolError::QueueTimeout));
            } else {
                i += 1;
            }
        }
    }

    /// Removes a waiter by id (e.g. the caller's future was dropped) and
    /// fails it, if still present. No-op if it already woke or expired.
    pub fn cancel(&mut self, id: Uuid) {
        if let Some(pos) = self.waiters.iter().position(|w| w.id == id) {
            let waiter = self.waiters.remove(pos).unwrap();
            let _ = waiter.completion.send(Err(PoolError::Shutdown));
        }
    }

    /// Fails and removes every currently queued waiter (pool shutdown or
    /// whole-browser restart draining the backlog).
    pub fn fail_all(&mut self, err: PoolError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.completion.send(Err(err.clone()));
        }
    }
}
