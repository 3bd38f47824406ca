//! Core traits and types for the versioned store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;

use super::keys::RequestKey;
use crate::net::Response;

/// A stored response and when it was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Capture a response now.
  pub fn new(response: Response) -> Self {
    Self {
      response,
      stored_at: Utc::now(),
    }
  }
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores. Each store maps request identities to entries.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Look up an entry in a store.
  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CacheEntry>>;

  /// Insert or wholesale replace an entry. Fails if the store does not exist.
  fn put(&self, store: &str, key: &RequestKey, entry: &CacheEntry) -> Result<()>;

  /// Remove an entry. Returns whether anything was removed.
  fn delete(&self, store: &str, key: &RequestKey) -> Result<bool>;

  /// List the keys held in a store.
  fn keys(&self, store: &str) -> Result<Vec<RequestKey>>;

  /// List the names of all existing stores.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Drop a store and everything in it. Returns whether it existed.
  fn delete_store(&self, name: &str) -> Result<bool>;
}

/// Handle to one opened store.
pub struct Store<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
}

impl<S: CacheStorage> Store<S> {
  /// Open (creating if needed) the named store.
  pub fn open(storage: Arc<S>, name: &str) -> Result<Self> {
    storage.open_store(name)?;
    Ok(Self {
      storage,
      name: name.to_string(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>> {
    self.storage.get(&self.name, key)
  }

  /// Store a response. Only 2xx responses are accepted.
  pub fn put(&self, key: &RequestKey, entry: &CacheEntry) -> Result<()> {
    if !entry.response.is_ok() {
      return Err(eyre!(
        "Refusing to store status {} for {}",
        entry.response.status,
        key.url()
      ));
    }
    self.storage.put(&self.name, key, entry)
  }

  pub fn delete(&self, key: &RequestKey) -> Result<bool> {
    self.storage.delete(&self.name, key)
  }

  pub fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.keys(&self.name)
  }
}

impl<S: CacheStorage> Clone for Store<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      name: self.name.clone(),
    }
  }
}

/// Where a response handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Live network response
  Network,
  /// Served from a store without touching the network
  Cache,
  /// Network failed, served from a store
  Offline,
  /// Network failed and nothing was cached
  Unavailable,
  /// Not eligible for caching, passed straight through
  Bypass,
}

/// A response together with its provenance.
#[derive(Debug, Clone)]
pub struct CacheResult {
  pub response: Response,
  pub source: CacheSource,
}

impl CacheResult {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: CacheSource::Cache,
    }
  }

  pub fn offline(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: CacheSource::Offline,
    }
  }

  pub fn unavailable() -> Self {
    Self {
      response: Response::offline(),
      source: CacheSource::Unavailable,
    }
  }

  pub fn bypass(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Bypass,
    }
  }
}
