//! Versioned response stores and the strategy engine that serves requests through them.
//!
//! - Named stores keyed by request identity, one per logical partition per version
//! - Network-first for API routes, cache-first for static assets
//! - Store failures degrade to a miss or a skipped write, never to a failed response

mod keys;
mod layer;
pub(crate) mod ops;
mod route;
mod storage;
mod traits;

pub use keys::RequestKey;
pub use layer::StrategyEngine;
pub use route::{Classifier, RouteClass};
pub use storage::{NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheResult, CacheSource, CacheStorage, Store};
