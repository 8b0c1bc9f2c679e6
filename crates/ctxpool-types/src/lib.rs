//! Wire contracts and error taxonomy shared across the context pool
//! workspace: the `ScrapeRequest`/`ScrapeResult` JSON shapes callers speak,
//! and the `PoolError` taxonomy the pool surfaces to them. No async, no I/O
//! — this crate only defines data.

mod error;
mod request;
mod result;
mod tags;

pub use error::PoolError;
pub use request::{ScrapeRequest, WaitUntil};
pub use result::ScrapeResult;
pub use tags::{satisfies, PROTECTED_TAG};
