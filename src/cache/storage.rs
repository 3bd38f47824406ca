//! Cache storage implementations: SQLite-backed and no-op.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use url::Url;

use super::keys::RequestKey;
use super::traits::{CacheEntry, CacheStorage};
use crate::net::{Request, Response};

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn open_store(&self, _name: &str) -> Result<()> {
    Ok(())
  }

  fn get(&self, _store: &str, _key: &RequestKey) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _store: &str, _key: &RequestKey, _entry: &CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _store: &str, _key: &RequestKey) -> Result<bool> {
    Ok(false)
  }

  fn keys(&self, _store: &str) -> Result<Vec<RequestKey>> {
    Ok(Vec::new())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn delete_store(&self, _name: &str) -> Result<bool> {
    Ok(false)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open or create the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives as long as the returned storage.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("stowaway").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per named store
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured request + response per request identity
CREATE TABLE IF NOT EXISTS entries (
    store_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    request_headers TEXT NOT NULL,
    request_body BLOB NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (store_name, key_hash),
    FOREIGN KEY (store_name) REFERENCES stores(name) ON DELETE CASCADE
);
"#;

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open store {}: {}", name, e))?;

    Ok(())
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
    let conn = self.conn()?;

    let row = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE store_name = ? AND key_hash = ?",
        params![store, key.hash()],
        |row| {
          Ok((
            row.get::<_, u16>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Vec<u8>>(2)?,
            row.get::<_, String>(3)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry from {}: {}", store, e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CacheEntry {
          response: Response {
            status,
            headers,
            body,
          },
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &str, key: &RequestKey, entry: &CacheEntry) -> Result<()> {
    let request = key.request();
    let request_headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize request headers: {}", e))?;
    let headers = serde_json::to_string(&entry.response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO entries
           (store_name, key_hash, method, url, request_headers, request_body, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          store,
          key.hash(),
          request.method,
          request.url.as_str(),
          request_headers,
          request.body,
          entry.response.status,
          headers,
          entry.response.body,
          entry.stored_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store entry in {}: {}", store, e))?;

    Ok(())
  }

  fn delete(&self, store: &str, key: &RequestKey) -> Result<bool> {
    let removed = self
      .conn()?
      .execute(
        "DELETE FROM entries WHERE store_name = ? AND key_hash = ?",
        params![store, key.hash()],
      )
      .map_err(|e| eyre!("Failed to delete entry from {}: {}", store, e))?;

    Ok(removed > 0)
  }

  fn keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT key_hash, method, url, request_headers, request_body FROM entries
         WHERE store_name = ?
         ORDER BY rowid",
      )
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

    let keys = stmt
      .query_map(params![store], read_key)
      .map_err(|e| eyre!("Failed to list keys of {}: {}", store, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key of {}: {}", store, e))?;

    Ok(keys)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT name FROM stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare store query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    // Entries go with it through ON DELETE CASCADE
    let removed = self
      .conn()?
      .execute("DELETE FROM stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    Ok(removed > 0)
  }
}

fn read_key(row: &Row<'_>) -> rusqlite::Result<RequestKey> {
  let hash: String = row.get(0)?;
  let method: String = row.get(1)?;
  let url: String = row.get(2)?;
  let headers: String = row.get(3)?;
  let body: Vec<u8> = row.get(4)?;

  let url = Url::parse(&url)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;
  let headers = serde_json::from_str(&headers)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;

  Ok(RequestKey::from_parts(
    Request {
      method,
      url,
      headers,
      body,
    },
    hash,
  ))
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("http://localhost/").unwrap().join(path).unwrap();
    RequestKey::new(&Request::get(url), &[])
  }

  fn entry(body: &str) -> CacheEntry {
    CacheEntry::new(Response::new(200, body))
  }

  #[test]
  fn test_put_get_roundtrip() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("stowaway-v1").unwrap();

    let stored = entry("hello");
    storage.put("stowaway-v1", &key("/index.html"), &stored).unwrap();

    let loaded = storage.get("stowaway-v1", &key("/index.html")).unwrap().unwrap();
    assert_eq!(loaded, stored);
    assert!(storage.get("stowaway-v1", &key("/other")).unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_wholesale() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("s").unwrap();

    let mut first = Response::new(200, "one");
    first.headers.push(("x-old".to_string(), "1".to_string()));
    storage.put("s", &key("/a"), &CacheEntry::new(first)).unwrap();
    storage.put("s", &key("/a"), &entry("two")).unwrap();

    let loaded = storage.get("s", &key("/a")).unwrap().unwrap();
    assert_eq!(loaded.response.text(), "two");
    assert!(loaded.response.headers.is_empty());
    assert_eq!(storage.keys("s").unwrap().len(), 1);
  }

  #[test]
  fn test_stores_are_partitioned() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("a").unwrap();
    storage.open_store("b").unwrap();

    storage.put("a", &key("/x"), &entry("from a")).unwrap();
    assert!(storage.get("b", &key("/x")).unwrap().is_none());
  }

  #[test]
  fn test_keys_carry_the_request() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("s").unwrap();

    let request = Request::new(
      "POST",
      Url::parse("http://localhost/api/progress").unwrap(),
      r#"{"step":2}"#,
    )
    .with_header("content-type", "application/json");
    let write_key = RequestKey::new(&request, &[]);
    storage
      .put("s", &write_key, &CacheEntry::new(Response::new(202, "")))
      .unwrap();

    let keys = storage.keys("s").unwrap();
    assert_eq!(keys, vec![write_key]);
    assert_eq!(keys[0].request().header("Content-Type"), Some("application/json"));
  }

  #[test]
  fn test_delete_reports_removal() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("s").unwrap();
    storage.put("s", &key("/a"), &entry("a")).unwrap();

    assert!(storage.delete("s", &key("/a")).unwrap());
    assert!(!storage.delete("s", &key("/a")).unwrap());
  }

  #[test]
  fn test_delete_store_drops_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("old").unwrap();
    storage.open_store("new").unwrap();
    storage.put("old", &key("/a"), &entry("a")).unwrap();

    assert_eq!(storage.store_names().unwrap(), vec!["old", "new"]);
    assert!(storage.delete_store("old").unwrap());
    assert!(!storage.delete_store("old").unwrap());
    assert_eq!(storage.store_names().unwrap(), vec!["new"]);
    assert!(storage.keys("old").unwrap().is_empty());
  }

  #[test]
  fn test_put_into_deleted_store_fails() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("gone").unwrap();
    storage.delete_store("gone").unwrap();

    assert!(storage.put("gone", &key("/a"), &entry("a")).is_err());
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.open_store("s").unwrap();
      storage.put("s", &key("/a"), &entry("kept")).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    assert_eq!(storage.store_names().unwrap(), vec!["s"]);
    let loaded = storage.get("s", &key("/a")).unwrap().unwrap();
    assert_eq!(loaded.response.text(), "kept");
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.open_store("s").unwrap();
    storage.put("s", &key("/a"), &entry("a")).unwrap();
    assert!(storage.get("s", &key("/a")).unwrap().is_none());
    assert!(storage.store_names().unwrap().is_empty());
  }
}
