//! `BrowserDriver` implementation backed by a single externally controlled
//! `spider_chrome` (chromiumoxide-compatible) browser process.
//!
//! Every `Context` the pool creates maps to one CDP browser context inside
//! this single process (spec §3 invariant I5: "all contexts share one
//! browser process"). Per-context proxy is passed at browser-context
//! creation time; per-context storage survives only for persistent
//! contexts, via a directory the driver owns exclusively while the context
//! is alive.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use chromiumoxide_cdp::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use ctxpool_types::{ScrapeRequest, ScrapeResult, WaitUntil};
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::DriverError;
use crate::traits::{BrowserDriver, DriverHandle};

struct LaunchedBrowser {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    _temp_dir: TempDir,
}

/// One live CDP browser context tracked by [`ChromeDriver`].
struct TrackedContext {
    cdp_context_id: String,
    persistent_dir: Option<PathBuf>,
}

/// Launch-time knobs forwarded from the service's environment (spec §6:
/// `BROWSER_HEADLESS`, `USE_VIRTUAL_DISPLAY`, `VIRTUAL_DISPLAY_SIZE`). The
/// pool treats the driver as opaque and never inspects these itself.
#[derive(Clone, Debug)]
pub struct ChromeLaunchOptions {
    pub headless: bool,
    pub use_virtual_display: bool,
    /// `WIDTHxHEIGHT`, e.g. `"1920x1080"`.
    pub virtual_display_size: String,
}

impl Default for ChromeLaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            use_virtual_display: false,
            virtual_display_size: "1920x1080".to_string(),
        }
    }
}

pub struct ChromeDriver {
    options: ChromeLaunchOptions,
    browser: Mutex<Option<LaunchedBrowser>>,
    contexts: Mutex<HashMap<String, TrackedContext>>,
}

impl ChromeDriver {
    pub fn new(headless: bool) -> Self {
        Self::with_options(ChromeLaunchOptions {
            headless,
            ..Default::default()
        })
    }

    pub fn with_options(options: ChromeLaunchOptions) -> Self {
        Self {
            options,
            browser: Mutex::new(None),
            contexts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn launch(&self) -> Result<(), DriverError> {
        let mut guard = self.browser.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let temp_dir = TempDir::new()
            .map_err(|e| DriverError::other(format!("failed to create temp directory: {e}")))?;

        let mut config_builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            // `block_resources` defaults to true pool-wide (spec §6); all
            // contexts share this one process (invariant I5), so the flag
            // is fixed at launch rather than toggled per scrape.
            .arg("--blink-settings=imagesEnabled=false");
        if self.options.headless {
            config_builder = config_builder.arg("--headless=new");
        }
        if self.options.use_virtual_display {
            // An Xvfb (or similar) display server is assumed to already be
            // running at this size; the driver only tells Chrome to use it
            // rather than launching the display server itself.
            config_builder = config_builder.arg(format!("--window-size={}", self.options.virtual_display_size.replace('x', ",")));
        }
        let mut browser_config = config_builder
            .build()
            .map_err(|e| DriverError::other(format!("failed to build browser config: {e}")))?;
        browser_config.user_data_dir = Some(temp_dir.path().to_path_buf());

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| DriverError::other(format!("failed to launch browser: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "browser event handler error");
                }
            }
            debug!("browser event handler ended");
        });

        *guard = Some(LaunchedBrowser {
            browser,
            handler_task,
            _temp_dir: temp_dir,
        });

        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        let launched = self.browser.lock().await.take();
        if let Some(mut launched) = launched {
            launched.handler_task.abort();
            if let Err(e) = launched.browser.close().await {
                warn!(error = %e, "error closing browser during shutdown");
            }
        }
        self.contexts.lock().await.clear();
        Ok(())
    }

    async fn new_context(
        &self,
        proxy: Option<&str>,
        storage_path: Option<&Path>,
        _tags: &BTreeSet<String>,
    ) -> Result<DriverHandle, DriverError> {
        let mut params = CreateBrowserContextParams::builder();
        if let Some(proxy) = proxy {
            params = params.proxy_server(proxy.to_string());
        }
        let params = params
            .build()
            .map_err(|e| DriverError::other(format!("invalid browser context params: {e}")))?;

        let browser_context_id = {
            let guard = self.browser.lock().await;
            let launched = guard.as_ref().ok_or(DriverError::TargetClosed)?;
            launched
                .browser
                .create_browser_context(params)
                .await
                .map_err(|e| DriverError::other(format!("create_browser_context failed: {e}")))?
        };

        let context_id = browser_context_id.to_string();
        let handle = DriverHandle::new(uuid::Uuid::new_v4().to_string());

        self.contexts.lock().await.insert(
            handle.0.clone(),
            TrackedContext {
                cdp_context_id: context_id,
                persistent_dir: storage_path.map(Path::to_path_buf),
            },
        );

        Ok(handle)
    }

    async fn close_context(&self, handle: &DriverHandle) -> Result<(), DriverError> {
        let tracked = self.contexts.lock().await.remove(&handle.0);
        let Some(tracked) = tracked else {
            // Idempotent: closing an unknown handle is not an error.
            return Ok(());
        };

        let guard = self.browser.lock().await;
        let Some(launched) = guard.as_ref() else {
            return Ok(());
        };

        let dispose = DisposeBrowserContextParams::builder()
            .browser_context_id(tracked.cdp_context_id.clone())
            .build()
            .map_err(|e| DriverError::other(format!("invalid dispose params: {e}")))?;

        if let Err(e) = launched.browser.execute(dispose).await {
            warn!(handle = %handle, error = %e, "error disposing browser context (treating as closed)");
        }

        Ok(())
    }

    async fn execute(
        &self,
        handle: &DriverHandle,
        request: &ScrapeRequest,
    ) -> Result<ScrapeResult, DriverError> {
        let cdp_context_id = {
            let contexts = self.contexts.lock().await;
            contexts
                .get(&handle.0)
                .map(|c| c.cdp_context_id.clone())
                .ok_or_else(|| DriverError::other(format!("unknown context handle {handle}")))?
        };

        let target_params = CreateTargetParams::builder()
            .url(request.url.clone())
            .browser_context_id(cdp_context_id)
            .build()
            .map_err(|e| DriverError::other(format!("invalid target params: {e}")))?;

        let page = {
            let guard = self.browser.lock().await;
            let launched = guard.as_ref().ok_or(DriverError::TargetClosed)?;
            launched
                .browser
                .new_page(target_params)
                .await
                .map_err(classify)?
        };

        match request.wait_for {
            WaitUntil::Load => {}
            WaitUntil::DomContentLoaded | WaitUntil::NetworkIdle => {
                debug!(?request.wait_for, "wait condition honored best-effort by the underlying engine");
            }
        }

        if !request.block_resources {
            // Image blocking is a launch-time flag shared by every context
            // in this process (see `launch()`); a request opting out can't
            // be honored without a per-page CDP override, which isn't
            // wired up yet.
            debug!("block_resources=false requested but not honored per-request; process-wide policy applies");
        }

        let content = if request.get_content {
            Some(
                page.content()
                    .await
                    .map_err(|e| DriverError::other(format!("content retrieval failed: {e}")))?,
            )
        } else {
            None
        };

        let script_result = if let Some(script) = &request.script {
            let value = page
                .evaluate(script.as_str())
                .await
                .map_err(|e| DriverError::other(format!("script evaluation failed: {e}")))?
                .into_value()
                .map_err(|e| DriverError::other(format!("script result not JSON: {e}")))?;
            Some(value)
        } else {
            None
        };

        let screenshot = if request.screenshot {
            let bytes = page
                .screenshot(Default::default())
                .await
                .map_err(|e| DriverError::other(format!("screenshot failed: {e}")))?;
            Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                bytes,
            ))
        } else {
            None
        };

        if let Err(e) = page.close().await {
            warn!(error = %e, "error closing scrape page (context remains alive)");
        }

        Ok(ScrapeResult {
            success: true,
            url: request.url.clone(),
            status: None,
            content,
            script_result,
            screenshot,
            context_id: handle.0.clone(),
            error: None,
        })
    }
}

/// Distinguishes a browser-process-level failure from an ordinary
/// navigation/page error (spec §4.6).
fn classify(err: chromiumoxide::error::CdpError) -> DriverError {
    let msg = err.to_string();
    if msg.contains("Target closed") || msg.contains("Connection closed") {
        DriverError::TargetClosed
    } else {
        DriverError::Other(msg)
    }
}
