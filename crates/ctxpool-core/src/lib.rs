//! The pool manager core (spec §2): admission control, context selection
//! under tag constraints, per-context-per-domain rate limiting, eviction
//! scoring, consecutive-error health tracking, and whole-browser crash
//! recovery. Depends only on `ctxpool-driver`'s `BrowserDriver` trait, so
//! it is fully testable against `FakeDriver` without a real browser.

mod config;
mod context;
mod eviction;
mod persistence;
mod queue;
mod rate_limiter;
mod pool;

pub use config::PoolConfig;
pub use context::{Context, ContextStatus};
pub use eviction::score as eviction_score;
pub use persistence::ContextMeta;
pub use pool::{ContextPool, PoolStats};
pub use rate_limiter::RateLimiter;
