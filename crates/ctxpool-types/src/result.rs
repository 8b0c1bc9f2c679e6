use serde::{Deserialize, Serialize};

/// Outcome of dispatching one `ScrapeRequest` to a context.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ScrapeResult {
    pub success: bool,
    pub url: String,
    pub status: Option<u16>,
    pub content: Option<String>,
    pub script_result: Option<serde_json::Value>,
    /// Base64-encoded screenshot, present only when requested and captured.
    pub screenshot: Option<String>,
    pub context_id: String,
    pub error: Option<String>,
}

impl ScrapeResult {
    pub fn ok(context_id: impl Into<String>, url: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            success: true,
            url: url.into(),
            status,
            content: None,
            script_result: None,
            screenshot: None,
            context_id: context_id.into(),
            error: None,
        }
    }

    pub fn failed(context_id: impl Into<String>, url: impl Into<String>, error: impl ToString) -> Self {
        Self {
            success: false,
            url: url.into(),
            status: None,
            content: None,
            script_result: None,
            screenshot: None,
            context_id: context_id.into(),
            error: Some(error.to_string()),
        }
    }
}
