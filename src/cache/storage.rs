//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use url::Url;

use crate::error::StorageError;
use crate::net::{request_key, Method, Response};

/// A request/response pair to be written into a bucket.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub method: Method,
  pub url: Url,
  pub response: Response,
}

/// A response read back out of a bucket.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the bucket holding this response was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Buckets are written whole and never patched afterwards.
pub trait CacheStorage: Send + Sync {
  /// Names of every bucket currently stored.
  fn bucket_names(&self) -> Result<Vec<String>, StorageError>;

  /// Atomically create (or replace) `bucket` with exactly `entries`.
  fn put_bucket(&self, bucket: &str, entries: &[CacheEntry]) -> Result<(), StorageError>;

  /// Exact lookup of a request key in one bucket.
  fn match_entry(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>, StorageError>;

  /// Delete a bucket and its entries. Returns false if it did not exist.
  fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  /// Database that lives only as long as this value.
  pub fn in_memory() -> Result<Self, StorageError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Default database location under the user's data directory.
  pub fn default_path() -> Option<std::path::PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|dir| dir.join("offline-worker").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::Poisoned(e.to_string()))
  }

  fn run_migrations(&self) -> Result<(), StorageError> {
    self.lock()?.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }

  #[cfg(test)]
  pub fn entry_count(&self, bucket: &str) -> Result<usize, StorageError> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM cache_entries WHERE bucket = ?",
      params![bucket],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per versioned bucket
CREATE TABLE IF NOT EXISTS cache_buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses keyed by sha256(method + url)
CREATE TABLE IF NOT EXISTS cache_entries (
    bucket TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_bucket ON cache_entries(bucket);
"#;

impl CacheStorage for SqliteStorage {
  fn bucket_names(&self) -> Result<Vec<String>, StorageError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM cache_buckets ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
  }

  fn put_bucket(&self, bucket: &str, entries: &[CacheEntry]) -> Result<(), StorageError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM cache_entries WHERE bucket = ?", params![bucket])?;
    tx.execute(
      "INSERT OR REPLACE INTO cache_buckets (name, created_at) VALUES (?, datetime('now'))",
      params![bucket],
    )?;

    for entry in entries {
      let headers = serde_json::to_string(&entry.response.headers)?;
      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (bucket, request_key, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          bucket,
          request_key(entry.method, &entry.url),
          entry.method.as_str(),
          entry.url.as_str(),
          entry.response.status,
          headers,
          entry.response.body,
        ],
      )?;
    }

    // Dropping an uncommitted transaction rolls it back
    tx.commit()?;
    Ok(())
  }

  fn match_entry(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>, StorageError> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE bucket = ? AND request_key = ?",
        params![bucket, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body, cached_at)) => Ok(Some(CachedResponse {
        response: Response {
          status,
          headers: serde_json::from_str(&headers)?,
          body,
        },
        cached_at: parse_datetime(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM cache_entries WHERE bucket = ?", params![bucket])?;
    let removed = tx.execute("DELETE FROM cache_buckets WHERE name = ?", params![bucket])?;
    tx.commit()?;
    Ok(removed > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|_| StorageError::Timestamp(s.to_string()))
}
