//! Environment-variable configuration loading.
//!
//! Smaller and more direct than the teacher's generic `EnvConfigLoader`
//! (`riptide-config::env`) — this service has a handful of known settings,
//! not an open-ended schema, so a hand-written loader with explicit
//! defaults reads more plainly than a builder over a string map.

use std::path::PathBuf;
use std::time::Duration;

use ctxpool_core::PoolConfig;
use ctxpool_driver::ChromeLaunchOptions;

/// Top-level service configuration, assembled once at startup. Env var
/// names follow spec §6 exactly so operators can carry over existing
/// deployment configuration unchanged.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub pool: PoolConfig,
    pub bind_addr: String,
    pub chrome: ChromeLaunchOptions,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let pool = PoolConfig {
            max_contexts: env_usize("MAX_CONTEXTS", 10),
            default_domain_delay_ms: env_u64("DEFAULT_DOMAIN_DELAY_MS", 1000),
            max_queue_wait: Duration::from_secs(env_u64("MAX_QUEUE_WAIT_SECONDS", 300)),
            max_consecutive_errors: env_u32("MAX_CONSECUTIVE_ERRORS", 5),
            persistent_contexts_path: env_path("PERSISTENT_CONTEXTS_PATH", "./data/contexts"),
        };

        let chrome = ChromeLaunchOptions {
            headless: env_bool("BROWSER_HEADLESS", true),
            use_virtual_display: env_bool("USE_VIRTUAL_DISPLAY", false),
            virtual_display_size: env_string("VIRTUAL_DISPLAY_SIZE", "1920x1080"),
        };

        Self {
            pool,
            bind_addr: env_string("CTXPOOL_BIND_ADDR", "0.0.0.0:8080"),
            chrome,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_string(key, default))
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_when_var_unset() {
        assert_eq!(env_usize("CTXPOOL_MAX_CONTEXTS_NONEXISTENT", 10), 10);
        assert_eq!(
            env_string("CTXPOOL_BIND_ADDR_NONEXISTENT", "0.0.0.0:8080"),
            "0.0.0.0:8080"
        );
    }

    #[test]
    fn parses_bool_variants() {
        std::env::set_var("CTXPOOL_TEST_BOOL", "yes");
        assert!(env_bool("CTXPOOL_TEST_BOOL", false));
        std::env::remove_var("CTXPOOL_TEST_BOOL");
    }
}
