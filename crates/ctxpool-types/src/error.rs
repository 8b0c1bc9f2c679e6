use thiserror::Error;

/// Error taxonomy surfaced by the pool to its callers (spec §7).
///
/// `TagMismatch` is intentionally absent: it is used only internally during
/// context selection and must never reach a caller (spec §9, Open Question
/// 2 — mint a context if capacity allows, otherwise queue).
#[derive(Debug, Error, Clone)]
pub enum PoolError {
    #[error("queue is full")]
    PoolFull,

    #[error("timed out waiting in queue")]
    QueueTimeout,

    #[error("scrape exceeded its deadline")]
    ScrapeTimeout,

    #[error("driver error: {0}")]
    DriverError(String),

    #[error("browser process closed unexpectedly")]
    TargetClosed,

    #[error("in-flight scrape aborted by browser restart")]
    BrowserRestarting,

    #[error("browser unavailable after exhausting restart retries")]
    BrowserUnavailable,

    #[error("pool is shutting down")]
    Shutdown,
}

impl PoolError {
    /// HTTP status an adapter should surface for this error (spec §7 table).
    pub fn http_status(&self) -> u16 {
        match self {
            PoolError::PoolFull => 503,
            PoolError::QueueTimeout => 503,
            PoolError::ScrapeTimeout => 504,
            PoolError::DriverError(_) => 502,
            PoolError::TargetClosed => 502,
            PoolError::BrowserRestarting => 503,
            PoolError::BrowserUnavailable => 503,
            PoolError::Shutdown => 503,
        }
    }

    /// Stable machine-readable discriminant, independent of the display
    /// message, so adapters can branch without string-matching.
    pub fn kind(&self) -> &'static str {
        match self {
            PoolError::PoolFull => "pool_full",
            PoolError::QueueTimeout => "queue_timeout",
            PoolError::ScrapeTimeout => "scrape_timeout",
            PoolError::DriverError(_) => "driver_error",
            PoolError::TargetClosed => "target_closed",
            PoolError::BrowserRestarting => "browser_restarting",
            PoolError::BrowserUnavailable => "browser_unavailable",
            PoolError::Shutdown => "shutdown",
        }
    }

    /// Whether this outcome should count against a context's
    /// `consecutive_errors` (spec §4.4 `release`).
    pub fn counts_as_context_error(&self) -> bool {
        matches!(
            self,
            PoolError::ScrapeTimeout | PoolError::DriverError(_) | PoolError::TargetClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(PoolError::PoolFull.http_status(), 503);
        assert_eq!(PoolError::QueueTimeout.http_status(), 503);
        assert_eq!(PoolError::ScrapeTimeout.http_status(), 504);
        assert_eq!(PoolError::DriverError("x".into()).http_status(), 502);
        assert_eq!(PoolError::TargetClosed.http_status(), 502);
        assert_eq!(PoolError::BrowserRestarting.http_status(), 503);
        assert_eq!(PoolError::BrowserUnavailable.http_status(), 503);
        assert_eq!(PoolError::Shutdown.http_status(), 503);
    }

    #[test]
    fn only_scrape_level_errors_count_against_health() {
        assert!(PoolError::ScrapeTimeout.counts_as_context_error());
        assert!(PoolError::DriverError("x".into()).counts_as_context_error());
        assert!(PoolError::TargetClosed.counts_as_context_error());
        assert!(!PoolError::PoolFull.counts_as_context_error());
        assert!(!PoolError::QueueTimeout.counts_as_context_error());
        assert!(!PoolError::BrowserRestarting.counts_as_context_error());
        assert!(!PoolError::BrowserUnavailable.counts_as_context_error());
        assert!(!PoolError::Shutdown.counts_as_context_error());
    }
}
