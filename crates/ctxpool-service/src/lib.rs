//! Library surface for the HTTP adapter and supervisor binary, split out
//! from `main.rs` so integration tests can build the router directly
//! against a `FakeDriver`-backed pool without spawning a real process —
//! the same `lib` + `bin` split the teacher uses for `riptide-api`
//! (`riptide_api::create_app` is exercised from `tests/health_check_test.rs`
//! the same way).

pub mod config;
pub mod http;

pub use config::ServiceConfig;
pub use http::{router, AppState};
