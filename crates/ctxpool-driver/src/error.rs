use thiserror::Error;

/// Errors a `BrowserDriver` implementation may return.
///
/// `TargetClosed` must be reported distinctly from every other failure mode
/// (spec §4.6): it is the signal that triggers the pool's whole-browser
/// restart protocol, whereas `Other` is an ordinary scrape failure that only
/// counts against a single context's health.
#[derive(Debug, Error, Clone)]
pub enum DriverError {
    #[error("browser process target closed")]
    TargetClosed,

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn other(msg: impl std::fmt::Display) -> Self {
        DriverError::Other(msg.to_string())
    }
}
