//! Single entry point that routes host events to the engine, lifecycle and sync queue.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheSource, CacheStorage, Classifier, StrategyEngine};
use crate::config::{Config, OfflinePolicy};
use crate::event::Event;
use crate::lifecycle::{resolve_manifest, ActivateReport, InstallReport, LifecycleManager};
use crate::net::{Network, Request, Response};
use crate::pending::PendingWork;
use crate::sync::{DeferredSyncQueue, SyncReport};

/// Result of handling one event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
  Installed(InstallReport),
  Activated(ActivateReport),
  Response {
    source: CacheSource,
    response: Response,
  },
  /// A bypassed request never reached the server
  Failed { error: String, deferred: bool },
  Synced(SyncReport),
  /// Sync tag this worker has no job for
  Ignored { tag: String },
  /// Input that could not be parsed into an event
  Rejected { error: String },
}

pub struct Worker<S: CacheStorage, N: Network> {
  engine: StrategyEngine<S, N>,
  lifecycle: LifecycleManager<S, N>,
  queue: DeferredSyncQueue<S, N>,
  pending: PendingWork,
  sync_tag: String,
}

impl<S: CacheStorage, N: Network> Worker<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, config: &Config, policy: &OfflinePolicy) -> Self {
    let pending = PendingWork::new();
    let key_headers = config.cache.key_headers.clone();

    let engine = StrategyEngine::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      Classifier::new(policy.api_pattern.clone()),
      policy.stores.clone(),
      key_headers.clone(),
      pending.clone(),
    );

    let lifecycle = LifecycleManager::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      policy.stores.clone(),
      resolve_manifest(&config.origin, &config.base_path, &policy.manifest),
      key_headers.clone(),
    );

    let queue = DeferredSyncQueue::new(
      storage,
      network,
      policy.stores.current.clone(),
      policy.progress_pattern.clone(),
      key_headers,
    );

    Self {
      engine,
      lifecycle,
      queue,
      pending,
      sync_tag: policy.sync_tag.clone(),
    }
  }

  pub fn queue(&self) -> &DeferredSyncQueue<S, N> {
    &self.queue
  }

  pub fn pending(&self) -> &PendingWork {
    &self.pending
  }

  /// Handle one event to completion.
  ///
  /// Cache writes scheduled while handling a fetch may still be running when this returns;
  /// call [`Worker::shutdown`] before tearing the process down.
  pub async fn dispatch(&self, event: Event) -> Outcome {
    match event {
      Event::Install => Outcome::Installed(self.lifecycle.install().await),
      Event::Activate => Outcome::Activated(self.lifecycle.activate()),
      Event::Fetch(request) => self.fetch(&request).await,
      Event::Sync { tag } => {
        if tag == self.sync_tag {
          Outcome::Synced(self.queue.replay().await)
        } else {
          debug!(tag = %tag, "no job for sync tag");
          Outcome::Ignored { tag }
        }
      }
    }
  }

  #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
  pub async fn fetch(&self, request: &Request) -> Outcome {
    match self.engine.handle(request).await {
      Ok(result) => Outcome::Response {
        source: result.source,
        response: result.response,
      },
      Err(e) => {
        let deferred = self.queue.accepts(request)
          && match self.queue.enqueue(request) {
            Ok(()) => true,
            Err(qe) => {
              warn!(error = %qe, "could not queue failed write");
              false
            }
          };
        Outcome::Failed {
          error: e.to_string(),
          deferred,
        }
      }
    }
  }

  /// Wait for scheduled cache writes so none are lost on exit.
  pub async fn shutdown(&self) {
    let count = self.pending.len();
    if count > 0 {
      info!(count, "waiting for pending cache writes");
    }
    self.pending.drain().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::MockNetwork;
  use url::Url;

  const ORIGIN: &str = "http://localhost:8080";

  fn worker(
    storage: &Arc<SqliteStorage>,
    network: &Arc<MockNetwork>,
  ) -> Worker<SqliteStorage, MockNetwork> {
    Worker::new(
      Arc::clone(storage),
      Arc::clone(network),
      &Config::default(),
      &OfflinePolicy::default(),
    )
  }

  fn fetch(method: &str, path: &str, body: &str) -> Event {
    let url = Url::parse(&format!("{}{}", ORIGIN, path)).unwrap();
    Event::Fetch(Request::new(method, url, body))
  }

  #[tokio::test]
  async fn test_install_fetch_then_offline_fetch() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    network.respond("GET", "http://localhost:8080/", Response::new(200, "<root>"));
    network.respond(
      "GET",
      "http://localhost:8080/index.html",
      Response::new(200, "<index>"),
    );
    network.respond(
      "GET",
      "http://localhost:8080/api/progress",
      Response::new(200, r#"{"ok":true}"#),
    );
    let worker = worker(&storage, &network);
    let current = OfflinePolicy::default().stores.current;

    worker.dispatch(Event::Install).await;
    assert_eq!(storage.keys(&current).unwrap().len(), 2);

    match worker.dispatch(fetch("GET", "/api/progress", "")).await {
      Outcome::Response { source, response } => {
        assert_eq!(source, CacheSource::Network);
        assert_eq!(response.text(), r#"{"ok":true}"#);
      }
      other => panic!("unexpected outcome {:?}", other),
    }
    worker.shutdown().await;
    assert_eq!(storage.keys(&current).unwrap().len(), 3);

    network.set_offline(true);
    match worker.dispatch(fetch("GET", "/api/progress", "")).await {
      Outcome::Response { source, response } => {
        assert_eq!(source, CacheSource::Offline);
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), r#"{"ok":true}"#);
      }
      other => panic!("unexpected outcome {:?}", other),
    }

    // Pre-cached root document is still served
    match worker.dispatch(fetch("GET", "/", "")).await {
      Outcome::Response { source, response } => {
        assert_eq!(source, CacheSource::Cache);
        assert_eq!(response.text(), "<root>");
      }
      other => panic!("unexpected outcome {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_failed_progress_write_is_deferred_then_synced() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    let worker = worker(&storage, &network);

    network.set_offline(true);
    match worker.dispatch(fetch("POST", "/api/progress", r#"{"step":4}"#)).await {
      Outcome::Failed { deferred, .. } => assert!(deferred),
      other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(worker.queue().pending().unwrap().len(), 1);

    network.set_offline(false);
    network.respond(
      "POST",
      "http://localhost:8080/api/progress",
      Response::new(200, "{}"),
    );
    match worker
      .dispatch(Event::Sync {
        tag: "sync-progress".to_string(),
      })
      .await
    {
      Outcome::Synced(report) => assert_eq!(report.replayed.len(), 1),
      other => panic!("unexpected outcome {:?}", other),
    }
    assert!(worker.queue().pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_other_failed_writes_are_not_deferred() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    network.set_offline(true);
    let worker = worker(&storage, &network);

    match worker.dispatch(fetch("POST", "/api/feedback", "{}")).await {
      Outcome::Failed { deferred, .. } => assert!(!deferred),
      other => panic!("unexpected outcome {:?}", other),
    }
    assert!(worker.queue().pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_unknown_sync_tag_is_ignored() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    let worker = worker(&storage, &network);

    let outcome = worker
      .dispatch(Event::Sync {
        tag: "sync-photos".to_string(),
      })
      .await;
    assert!(matches!(outcome, Outcome::Ignored { ref tag } if tag == "sync-photos"));
    assert_eq!(network.call_count(), 0);
  }

  #[tokio::test]
  async fn test_activate_leaves_only_current_stores() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    storage.open_store("stowaway-v0").unwrap();
    storage.open_store("stowaway-assets-v0").unwrap();
    let worker = worker(&storage, &network);
    let policy = OfflinePolicy::default();

    worker.dispatch(Event::Install).await;
    worker.dispatch(Event::Activate).await;

    for name in storage.store_names().unwrap() {
      assert!(policy.stores.is_recognized(&name), "{} survived", name);
    }
  }

  #[test]
  fn test_outcome_serializes_with_tag() {
    let outcome = Outcome::Response {
      source: CacheSource::Offline,
      response: Response::offline(),
    };
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["outcome"], "response");
    assert_eq!(json["source"], "offline");
    assert_eq!(json["response"]["status"], 503);
    assert_eq!(json["response"]["body"], "Offline");
  }
}
