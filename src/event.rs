use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::net::Request;

/// Triggers delivered by the host environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
  /// A new version was deployed and should pre-cache its manifest
  Install,
  /// The new version is about to take over traffic
  Activate,
  /// An intercepted request
  Fetch(Request),
  /// A named background sync fired
  Sync { tag: String },
}

/// Event handler that produces events from newline-delimited JSON input
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Result<Event>>,
}

impl EventHandler {
  /// Read events from stdin
  pub fn stdin() -> Self {
    Self::new(BufReader::new(tokio::io::stdin()))
  }

  /// Read events from any line-oriented source
  pub fn new<R>(reader: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = reader.lines();
      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            let _ = tx.send(Err(eyre!("Failed to read event: {}", e)));
            break;
          }
        };

        let line = line.trim();
        if line.is_empty() {
          continue;
        }

        let event = serde_json::from_str::<Event>(line)
          .map_err(|e| eyre!("Invalid event {}: {}", line, e));
        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event, or None once the input is exhausted
  pub async fn next(&mut self) -> Option<Result<Event>> {
    self.rx.recv().await
  }
}
