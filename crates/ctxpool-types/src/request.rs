use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long the driver should wait before considering navigation complete.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// One scrape request handed to the pool by an adapter.
///
/// Field defaults mirror the contract in the specification: a request with
/// only `url` set is a plain best-effort page fetch.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ScrapeRequest {
    /// Target URL. Must be an absolute http(s) URL.
    pub url: String,

    /// Tags a context must already carry to be eligible for this request.
    #[serde(default)]
    pub required_tags: BTreeSet<String>,

    /// Proxy to use if a new context must be minted for this request.
    /// Ignored when an existing eligible context is selected.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Per-request override of the domain spacing delay, in milliseconds.
    #[serde(default)]
    pub domain_delay_ms: Option<u64>,

    #[serde(default)]
    pub wait_for: WaitUntil,

    /// Request timeout in milliseconds. Defaults to 30s.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub get_content: bool,

    /// Optional script evaluated in the page after load.
    #[serde(default)]
    pub script: Option<String>,

    #[serde(default)]
    pub screenshot: bool,

    #[serde(default = "default_true")]
    pub block_resources: bool,

    /// Whether a context minted for this request should persist to disk.
    /// Only consulted on context creation; ignored when reusing a context.
    #[serde(default)]
    pub persistent: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl ScrapeRequest {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Effective per-domain delay for this request, falling back to the
    /// pool-wide default when unset.
    pub fn domain_delay(&self, default_delay_ms: u64) -> Duration {
        Duration::from_millis(self.domain_delay_ms.unwrap_or(default_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let req: ScrapeRequest = serde_json::from_str(r#"{"url":"https://a.example/"}"#).unwrap();
        assert_eq!(req.wait_for, WaitUntil::Load);
        assert_eq!(req.timeout_ms, 30_000);
        assert!(req.get_content);
        assert!(req.block_resources);
        assert!(!req.screenshot);
        assert!(!req.persistent);
        assert!(req.required_tags.is_empty());
    }

    #[test]
    fn domain_delay_falls_back_to_default() {
        let req: ScrapeRequest = serde_json::from_str(r#"{"url":"https://a.example/"}"#).unwrap();
        assert_eq!(req.domain_delay(1000), Duration::from_millis(1000));

        let req: ScrapeRequest =
            serde_json::from_str(r#"{"url":"https://a.example/","domain_delay_ms":250}"#)
                .unwrap();
        assert_eq!(req.domain_delay(1000), Duration::from_millis(250));
    }
}
