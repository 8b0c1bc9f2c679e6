//! The `BrowserDriver` contract (spec §4.6) plus two implementations: a
//! real one backed by `spider_chrome`, and an in-memory fake used by tests.

mod chrome;
mod error;
mod fake;
mod traits;

pub use chrome::{ChromeDriver, ChromeLaunchOptions};
pub use error::DriverError;
pub use fake::{FakeDriver, ScriptedOutcome};
pub use traits::{BrowserDriver, DriverHandle};
