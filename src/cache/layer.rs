//! Strategy engine that decides between stores and the network for each request.

use std::sync::Arc;
use tracing::{debug, warn};

use super::keys::RequestKey;
use super::route::{Classifier, RouteClass};
use super::ops::{lookup, schedule_put};
use super::traits::{CacheResult, CacheStorage};
use crate::config::StoreNames;
use crate::net::{Network, Request};
use crate::pending::PendingWork;

/// Serves intercepted requests through the versioned stores.
///
/// The engine holds no per-request state. Every store failure is absorbed: reads degrade to a
/// miss and writes are skipped, so caching never turns a working response into a failure.
pub struct StrategyEngine<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  classifier: Classifier,
  stores: StoreNames,
  key_headers: Vec<String>,
  pending: PendingWork,
}

impl<S: CacheStorage, N: Network> StrategyEngine<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    classifier: Classifier,
    stores: StoreNames,
    key_headers: Vec<String>,
    pending: PendingWork,
  ) -> Self {
    Self {
      storage,
      network,
      classifier,
      stores,
      key_headers,
      pending,
    }
  }

  /// Handle an intercepted request.
  ///
  /// Non-GET requests are passed straight to the network and their transport errors are
  /// returned as-is. Cacheable requests never fail: the worst outcome is the 503 offline
  /// response.
  pub async fn handle(&self, request: &Request) -> color_eyre::Result<CacheResult> {
    if !self.classifier.is_cacheable(request) {
      debug!(method = %request.method, url = %request.url, "bypassing cache");
      let response = self.network.send(request).await?;
      return Ok(CacheResult::bypass(response));
    }

    let result = match self.classifier.classify(request) {
      RouteClass::Dynamic => self.network_first(request).await,
      RouteClass::Static => self.cache_first(request).await,
    };
    Ok(result)
  }

  /// Network first, falling back to the current-version store when the network is unreachable.
  pub async fn network_first(&self, request: &Request) -> CacheResult {
    let key = RequestKey::new(request, &self.key_headers);

    match self.network.send(request).await {
      Ok(response) => {
        if response.is_ok() {
          schedule_put(
            &self.pending,
            Arc::clone(&self.storage),
            &self.stores.current,
            key,
            response.clone(),
          );
        }
        CacheResult::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        match lookup(self.storage.as_ref(), &self.stores.current, &key) {
          Some(entry) => CacheResult::offline(entry),
          None => {
            warn!(url = %request.url, "offline and not cached");
            CacheResult::unavailable()
          }
        }
      }
    }
  }

  /// Cache first across both stores; the network is only consulted on a miss.
  pub async fn cache_first(&self, request: &Request) -> CacheResult {
    let key = RequestKey::new(request, &self.key_headers);

    for store in [&self.stores.current, &self.stores.assets] {
      if let Some(entry) = lookup(self.storage.as_ref(), store, &key) {
        debug!(url = %request.url, store = %store, outcome = "hit", "serving cached response");
        return CacheResult::from_cache(entry);
      }
    }

    debug!(url = %request.url, outcome = "miss", "cache miss, fetching");
    match self.network.send(request).await {
      Ok(response) => {
        if response.is_ok() {
          schedule_put(
            &self.pending,
            Arc::clone(&self.storage),
            &self.stores.assets,
            key,
            response.clone(),
          );
        }
        CacheResult::from_network(response)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "offline and not cached");
        CacheResult::unavailable()
      }
    }
  }
}
