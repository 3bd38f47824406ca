//! Durable queue of progress writes that could not reach the server.
//!
//! Queued writes live in the current-version store next to cached responses. The queue is the
//! subset of that store's keys that are writes to the progress endpoint.

use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, CacheStorage, RequestKey, Store};
use crate::net::{Network, Request, Response};

/// Status of the marker entry stored for a queued write.
const QUEUED_STATUS: u16 = 202;

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
  pub replayed: Vec<String>,
  pub retained: Vec<String>,
}

pub struct DeferredSyncQueue<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  store: String,
  progress_pattern: String,
  key_headers: Vec<String>,
}

impl<S: CacheStorage, N: Network> DeferredSyncQueue<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    store: impl Into<String>,
    progress_pattern: impl Into<String>,
    key_headers: Vec<String>,
  ) -> Self {
    Self {
      storage,
      network,
      store: store.into(),
      progress_pattern: progress_pattern.into(),
      key_headers,
    }
  }

  /// Whether a request is a progress write that belongs in this queue.
  pub fn accepts(&self, request: &Request) -> bool {
    !request.is_get() && request.url.path().contains(&self.progress_pattern)
  }

  /// Queue a write that failed to reach the network.
  pub fn enqueue(&self, request: &Request) -> Result<()> {
    let key = RequestKey::new(request, &self.key_headers);
    let store = Store::open(Arc::clone(&self.storage), &self.store)?;
    store.put(&key, &CacheEntry::new(Response::new(QUEUED_STATUS, Vec::new())))?;

    info!(method = %key.method(), url = %key.url(), "queued write for later sync");
    Ok(())
  }

  /// List queued writes.
  pub fn pending(&self) -> Result<Vec<RequestKey>> {
    let store = Store::open(Arc::clone(&self.storage), &self.store)?;
    let keys = store.keys()?;
    Ok(
      keys
        .into_iter()
        .filter(|key| self.accepts(key.request()))
        .collect(),
    )
  }

  /// Replay every queued write, removing the ones the server accepted.
  ///
  /// A failure on one entry never stops the others; failed entries stay for the next trigger.
  pub async fn replay(&self) -> SyncReport {
    let mut report = SyncReport::default();

    let queued = match self.pending() {
      Ok(queued) => queued,
      Err(e) => {
        error!(store = %self.store, error = %e, "background sync failed");
        return report;
      }
    };

    debug!(count = queued.len(), "replaying queued writes");
    for key in queued {
      let url = key.url().to_string();
      match self.network.send(key.request()).await {
        Ok(response) if response.is_ok() => match self.storage.delete(&self.store, &key) {
          Ok(_) => report.replayed.push(url),
          Err(e) => {
            // Sent but still queued: the next pass sends it again
            warn!(url = %url, error = %e, "replayed write could not be dequeued");
            report.retained.push(url);
          }
        },
        Ok(response) => {
          warn!(url = %url, status = response.status, "server rejected queued write");
          report.retained.push(url);
        }
        Err(e) => {
          error!(url = %url, error = %e, "failed to sync progress");
          report.retained.push(url);
        }
      }
    }

    info!(
      replayed = report.replayed.len(),
      retained = report.retained.len(),
      "background sync complete"
    );
    report
  }
}
