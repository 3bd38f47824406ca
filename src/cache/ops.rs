//! Best-effort store access shared by the engine, the lifecycle manager and the sync queue.

use std::sync::Arc;
use tracing::{debug, warn};

use super::keys::RequestKey;
use super::traits::{CacheEntry, CacheStorage, Store};
use crate::net::Response;
use crate::pending::PendingWork;

/// Read an entry, treating any store failure as a miss.
pub fn lookup<S: CacheStorage>(storage: &S, store: &str, key: &RequestKey) -> Option<CacheEntry> {
  match storage.get(store, key) {
    Ok(entry) => entry,
    Err(e) => {
      warn!(store = %store, url = %key.url(), error = %e, "cache read failed, treating as miss");
      None
    }
  }
}

/// Open `store` and write `response` under `key`, logging instead of failing.
pub fn put_now<S: CacheStorage>(
  storage: Arc<S>,
  store: &str,
  key: &RequestKey,
  response: Response,
) -> bool {
  let entry = CacheEntry::new(response);
  match Store::open(storage, store).and_then(|s| s.put(key, &entry)) {
    Ok(()) => {
      debug!(store = %store, url = %key.url(), "cached response");
      true
    }
    Err(e) => {
      warn!(store = %store, url = %key.url(), error = %e, "cache write skipped");
      false
    }
  }
}

/// Schedule a cache write without making the caller wait for it.
///
/// The write is registered with `pending` before this returns, so a host that drains pending
/// work before teardown never loses it.
pub fn schedule_put<S: CacheStorage>(
  pending: &PendingWork,
  storage: Arc<S>,
  store: &str,
  key: RequestKey,
  response: Response,
) {
  let store = store.to_string();
  pending.spawn_blocking(move || {
    put_now(storage, &store, &key, response);
  });
}
