//! Offline-first request interception.
//!
//! Intercepted requests are served through versioned response stores so an application keeps
//! working without connectivity:
//! - API routes go network-first and fall back to the last good response
//! - Static assets go cache-first and are pre-cached on install
//! - Stores from earlier versions are purged on activate
//! - Progress writes that fail are queued durably and replayed on a background sync trigger

pub mod cache;
pub mod config;
pub mod event;
pub mod lifecycle;
pub mod net;
pub mod pending;
pub mod sync;
pub mod telemetry;
pub mod worker;

pub use event::Event;
pub use worker::{Outcome, Worker};
