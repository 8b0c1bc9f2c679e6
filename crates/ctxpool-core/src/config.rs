use std::path::PathBuf;
use std::time::Duration;

/// Pool-wide tunables (spec §6). Loading these from the environment is the
/// service crate's job (`ctxpool-service::config`); this crate only
/// consumes the resolved values.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_contexts: usize,
    pub default_domain_delay_ms: u64,
    pub max_queue_wait: Duration,
    pub max_consecutive_errors: u32,
    pub persistent_contexts_path: PathBuf,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_contexts: 10,
            default_domain_delay_ms: 1000,
            max_queue_wait: Duration::from_secs(300),
            max_consecutive_errors: 5,
            persistent_contexts_path: PathBuf::from("./data/contexts"),
        }
    }
}

impl PoolConfig {
    /// Hard cap on queue length (spec §4.3: `max_contexts * 4`), beyond
    /// which `enqueue` fails immediately with `PoolFull`.
    pub fn queue_cap(&self) -> usize {
        self.max_contexts * 4
    }
}

/// Bounded retry budget for relaunching the browser after a whole-browser
/// restart (spec §4.5 step 5): 3 attempts, backoff 1s, 2s, 4s.
pub const RESTART_MAX_ATTEMPTS: u32 = 3;
pub const RESTART_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const RESTART_BACKOFF_MULTIPLIER: u32 = 2;

pub fn restart_backoff(attempt: u32) -> Duration {
    RESTART_INITIAL_BACKOFF * RESTART_BACKOFF_MULTIPLIER.pow(attempt)
}

/// How long `ContextPool::shutdown` waits for in-flight scrapes to finish on
/// their own before forcing `driver.close_context`/`driver.shutdown` (spec
/// §6: "grace period, 30s").
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_cap_is_four_times_max_contexts() {
        let cfg = PoolConfig {
            max_contexts: 10,
            ..Default::default()
        };
        assert_eq!(cfg.queue_cap(), 40);
    }

    #[test]
    fn restart_backoff_matches_spec_sequence() {
        assert_eq!(restart_backoff(0), Duration::from_secs(1));
        assert_eq!(restart_backoff(1), Duration::from_secs(2));
        assert_eq!(restart_backoff(2), Duration::from_secs(4));
    }
}
