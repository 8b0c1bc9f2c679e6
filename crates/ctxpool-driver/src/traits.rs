use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use ctxpool_types::{ScrapeRequest, ScrapeResult};

use crate::error::DriverError;

/// Opaque handle into a `BrowserDriver`'s notion of a context.
///
/// Valid only while the context that owns it has not been destroyed; the
/// pool never interprets the inner value, it only stores and compares it
/// (spec §3: "valid only while `status ≠ destroyed`").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DriverHandle(pub String);

impl DriverHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The only component that talks to the real browser (spec §2 item 4,
/// §4.6). The pool depends solely on this trait; `ctxpool-core` is unaware
/// of chromiumoxide/spider_chrome or any other concrete engine.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Launch (or relaunch) the underlying browser process.
    async fn launch(&self) -> Result<(), DriverError>;

    /// Tear down the underlying browser process. Idempotent.
    async fn shutdown(&self) -> Result<(), DriverError>;

    /// Create a new isolated browser context.
    ///
    /// `storage_path` is `Some` only for persistent contexts; the driver
    /// owns the directory's contents exclusively while the returned handle
    /// is alive.
    async fn new_context(
        &self,
        proxy: Option<&str>,
        storage_path: Option<&Path>,
        tags: &BTreeSet<String>,
    ) -> Result<DriverHandle, DriverError>;

    /// Destroy a context. Idempotent (spec §4.6).
    async fn close_context(&self, handle: &DriverHandle) -> Result<(), DriverError>;

    /// Perform one scrape step on `handle`: navigate, optionally run a
    /// script, optionally capture a screenshot, optionally return content.
    async fn execute(
        &self,
        handle: &DriverHandle,
        request: &ScrapeRequest,
    ) -> Result<ScrapeResult, DriverError>;
}
