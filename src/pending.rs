//! Registry of fire-and-forget work that must finish before teardown.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Background tasks spawned as side effects of handling an event.
///
/// Callers get their answer without waiting for these, but the host must call
/// [`PendingWork::drain`] before shutting down so no scheduled cache write is lost.
#[derive(Clone, Default)]
pub struct PendingWork {
  tasks: Arc<Mutex<JoinSet<()>>>,
}

impl PendingWork {
  pub fn new() -> Self {
    Self::default()
  }

  fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
    self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Schedule blocking work (store I/O) on the blocking pool.
  pub fn spawn_blocking<F>(&self, work: F)
  where
    F: FnOnce() + Send + 'static,
  {
    let mut tasks = self.tasks();
    // Reap whatever already finished so the set doesn't grow unbounded
    while let Some(result) = tasks.try_join_next() {
      log_join(result);
    }
    tasks.spawn_blocking(work);
  }

  /// Number of tasks not yet reaped.
  pub fn len(&self) -> usize {
    self.tasks().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Wait for every scheduled task, including ones scheduled while draining.
  pub async fn drain(&self) {
    loop {
      let mut batch = std::mem::take(&mut *self.tasks());
      if batch.is_empty() {
        break;
      }

      debug!(count = batch.len(), "draining pending work");
      while let Some(result) = batch.join_next().await {
        log_join(result);
      }
    }
  }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
  if let Err(e) = result {
    warn!(error = %e, "pending task did not complete");
  }
}
