//! Install and activate handling for a deployed version.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::ops::put_now;
use crate::cache::{CacheStorage, RequestKey};
use crate::config::StoreNames;
use crate::net::{Network, Request};

/// Outcome of pre-caching the static manifest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
  pub store: String,
  pub cached: Vec<String>,
  pub failed: Vec<String>,
}

/// Outcome of purging stores left behind by earlier versions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivateReport {
  pub kept: Vec<String>,
  pub deleted: Vec<String>,
}

/// Resolve manifest entries against the base path and origin.
///
/// `./` maps to the base path itself, `./x` to `x` under the base path; anything else is taken
/// verbatim. Entries that do not form a valid URL are logged and dropped.
pub fn resolve_manifest(origin: &Url, base_path: &str, entries: &[String]) -> Vec<Url> {
  let mut base = base_path.trim().to_string();
  if !base.starts_with('/') {
    base.insert(0, '/');
  }
  if !base.ends_with('/') {
    base.push('/');
  }

  entries
    .iter()
    .filter_map(|entry| {
      let path = if entry == "./" {
        base.clone()
      } else if let Some(rest) = entry.strip_prefix("./") {
        format!("{}{}", base, rest)
      } else {
        entry.clone()
      };

      match origin.join(&path) {
        Ok(url) => Some(url),
        Err(e) => {
          warn!(entry = %entry, error = %e, "skipping invalid manifest entry");
          None
        }
      }
    })
    .collect()
}

/// Seeds the current-version store on install and purges stale stores on activate.
pub struct LifecycleManager<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  stores: StoreNames,
  manifest: Vec<Url>,
  key_headers: Vec<String>,
}

impl<S: CacheStorage, N: Network> LifecycleManager<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    stores: StoreNames,
    manifest: Vec<Url>,
    key_headers: Vec<String>,
  ) -> Self {
    Self {
      storage,
      network,
      stores,
      manifest,
      key_headers,
    }
  }

  pub fn manifest(&self) -> &[Url] {
    &self.manifest
  }

  /// Pre-cache every manifest entry into the current-version store.
  ///
  /// Entries are fetched concurrently. A failure on any entry is logged and reported but never
  /// fails the install.
  pub async fn install(&self) -> InstallReport {
    let mut report = InstallReport {
      store: self.stores.current.clone(),
      ..Default::default()
    };

    if let Err(e) = self.storage.open_store(&self.stores.current) {
      warn!(store = %self.stores.current, error = %e, "could not open store, skipping pre-cache");
      report.failed = self.manifest.iter().map(|u| u.to_string()).collect();
      return report;
    }

    let fetches = self.manifest.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let result = self.network.send(&request).await;
      (request, result)
    });

    for (request, result) in join_all(fetches).await {
      let url = request.url.to_string();
      let cached = match result {
        Ok(response) if response.is_ok() => {
          let key = RequestKey::new(&request, &self.key_headers);
          put_now(Arc::clone(&self.storage), &self.stores.current, &key, response)
        }
        Ok(response) => {
          warn!(url = %url, status = response.status, "manifest entry not cacheable");
          false
        }
        Err(e) => {
          warn!(url = %url, error = %e, "failed to fetch manifest entry");
          false
        }
      };

      if cached {
        report.cached.push(url);
      } else {
        report.failed.push(url);
      }
    }

    info!(
      store = %report.store,
      cached = report.cached.len(),
      failed = report.failed.len(),
      "install complete"
    );
    report
  }

  /// Delete every store whose name this version does not recognize.
  pub fn activate(&self) -> ActivateReport {
    let mut report = ActivateReport::default();

    let names = match self.storage.store_names() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "could not list stores, nothing purged");
        return report;
      }
    };

    for name in names {
      if self.stores.is_recognized(&name) {
        report.kept.push(name);
        continue;
      }

      match self.storage.delete_store(&name) {
        Ok(_) => {
          info!(store = %name, "deleted stale store");
          report.deleted.push(name);
        }
        Err(e) => warn!(store = %name, error = %e, "failed to delete stale store"),
      }
    }

    report
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::{MockNetwork, Response};

  fn origin() -> Url {
    Url::parse("http://localhost:8080/").unwrap()
  }

  fn names() -> StoreNames {
    StoreNames::for_version("stowaway", "v2")
  }

  fn manifest(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|s| s.to_string()).collect()
  }

  fn manager(
    storage: &Arc<SqliteStorage>,
    network: &Arc<MockNetwork>,
    entries: &[&str],
  ) -> LifecycleManager<SqliteStorage, MockNetwork> {
    LifecycleManager::new(
      Arc::clone(storage),
      Arc::clone(network),
      names(),
      resolve_manifest(&origin(), "/", &manifest(entries)),
      Vec::new(),
    )
  }

  #[test]
  fn test_resolve_manifest_under_base_path() {
    let urls = resolve_manifest(
      &origin(),
      "app",
      &manifest(&["./", "./index.html", "/fonts/a.woff2"]),
    );
    let urls: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
    assert_eq!(
      urls,
      vec![
        "http://localhost:8080/app/",
        "http://localhost:8080/app/index.html",
        "http://localhost:8080/fonts/a.woff2",
      ]
    );
  }

  #[test]
  fn test_resolve_manifest_at_root() {
    let urls = resolve_manifest(&origin(), "/", &manifest(&["./", "./index.html"]));
    assert_eq!(urls[0].as_str(), "http://localhost:8080/");
    assert_eq!(urls[1].as_str(), "http://localhost:8080/index.html");
  }

  #[tokio::test]
  async fn test_install_caches_every_manifest_entry() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    network.respond("GET", "http://localhost:8080/", Response::new(200, "<root>"));
    network.respond(
      "GET",
      "http://localhost:8080/index.html",
      Response::new(200, "<index>"),
    );

    let report = manager(&storage, &network, &["./", "./index.html"]).install().await;
    assert_eq!(report.cached.len(), 2);
    assert!(report.failed.is_empty());

    let keys = storage.keys(&names().current).unwrap();
    let mut paths: Vec<&str> = keys.iter().map(|k| k.url().path()).collect();
    paths.sort();
    assert_eq!(paths, vec!["/", "/index.html"]);
  }

  #[tokio::test]
  async fn test_install_tolerates_partial_failure() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    network.respond("GET", "http://localhost:8080/", Response::new(200, "<root>"));
    network.respond(
      "GET",
      "http://localhost:8080/missing.css",
      Response::new(404, ""),
    );
    // ./offline.png has no route: transport failure

    let report = manager(&storage, &network, &["./", "./missing.css", "./offline.png"])
      .install()
      .await;
    assert_eq!(report.cached, vec!["http://localhost:8080/"]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(storage.keys(&names().current).unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_install_offline_still_creates_store() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    network.set_offline(true);

    let report = manager(&storage, &network, &["./"]).install().await;
    assert!(report.cached.is_empty());
    assert_eq!(storage.store_names().unwrap(), vec![names().current]);
  }

  #[test]
  fn test_activate_purges_previous_versions() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    for name in [
      "stowaway-v1",
      "stowaway-assets-v1",
      "stowaway-v2",
      "stowaway-assets-v2",
      "unrelated",
    ] {
      storage.open_store(name).unwrap();
    }

    let report = manager(&storage, &network, &[]).activate();
    assert_eq!(report.kept, vec!["stowaway-v2", "stowaway-assets-v2"]);
    assert_eq!(
      report.deleted,
      vec!["stowaway-v1", "stowaway-assets-v1", "unrelated"]
    );

    let mut remaining = storage.store_names().unwrap();
    remaining.sort();
    assert_eq!(remaining, vec!["stowaway-assets-v2", "stowaway-v2"]);
  }

  #[test]
  fn test_activate_twice_is_a_no_op() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    storage.open_store("stowaway-v1").unwrap();
    storage.open_store("stowaway-v2").unwrap();

    let lifecycle = manager(&storage, &network, &[]);
    assert_eq!(lifecycle.activate().deleted, vec!["stowaway-v1"]);
    assert!(lifecycle.activate().deleted.is_empty());
  }
}
