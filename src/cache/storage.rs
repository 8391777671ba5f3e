//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, ShellCacheError};
use crate::net::{RequestKey, Response};

/// A single stored response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// The stored response snapshot
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Implementations must serialize concurrent writes to the same key.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named store if it does not exist.
  fn create_store(&self, name: &str) -> Result<()>;

  /// Names of every existing store, sorted.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and its entries. Returns false if it did not exist.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Look up a single entry.
  fn get_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or overwrite a single entry.
  ///
  /// Returns false without writing when the store does not exist, so a
  /// handle outliving its store never brings it back.
  fn put_entry(&self, store: &str, key: &RequestKey, response: &Response) -> Result<bool>;

  /// Create the store and write a batch of entries in one transaction.
  fn put_entries(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Keys stored under a store, sorted by URL.
  fn entry_keys(&self, store: &str) -> Result<Vec<RequestKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        ShellCacheError::StoreUnavailable(format!("Failed to create cache directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      ShellCacheError::StoreUnavailable(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Open a private database that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
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
      .ok_or_else(|| ShellCacheError::Config("Could not determine data directory".into()))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    self.lock()?.execute_batch(CACHE_SCHEMA).map_err(|e| {
      ShellCacheError::StoreUnavailable(format!("Failed to run cache migrations: {}", e))
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| ShellCacheError::StoreUnavailable(format!("Lock poisoned: {}", e)))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named, versioned stores
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Request key -> response snapshot
CREATE TABLE IF NOT EXISTS entries (
    store_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_store ON entries(store_name);
"#;

const UPSERT_ENTRY: &str =
  "INSERT OR REPLACE INTO entries (store_name, key_hash, method, url, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))";

fn insert_entry(
  conn: &Connection,
  store: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)?;

  conn.execute(
    UPSERT_ENTRY,
    params![
      store,
      key.digest(),
      key.method.as_str(),
      key.url,
      response.status,
      headers,
      response.body
    ],
  )?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn create_store(&self, name: &str) -> Result<()> {
    self
      .lock()?
      .execute("INSERT OR IGNORE INTO stores (name) VALUES (?)", params![name])
      .map_err(|e| {
        ShellCacheError::StoreUnavailable(format!("Failed to create store {}: {}", name, e))
      })?;
    Ok(())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM stores ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM entries WHERE store_name = ?", params![name])?;
    let removed = tx.execute("DELETE FROM stores WHERE name = ?", params![name])?;

    tx.commit()?;
    Ok(removed > 0)
  }

  fn get_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE store_name = ? AND key_hash = ?",
        params![store, key.digest()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body, cached_at)) => Ok(Some(CachedEntry {
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

  fn put_entry(&self, store: &str, key: &RequestKey, response: &Response) -> Result<bool> {
    let conn = self.lock()?;

    let exists = conn
      .query_row("SELECT 1 FROM stores WHERE name = ?", params![store], |_| Ok(()))
      .optional()?
      .is_some();
    if !exists {
      return Ok(false);
    }

    insert_entry(&conn, store, key, response)?;
    Ok(true)
  }

  fn put_entries(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute("INSERT OR IGNORE INTO stores (name) VALUES (?)", params![store])?;

    for (key, response) in entries {
      insert_entry(&tx, store, key, response)?;
    }

    tx.commit()?;
    Ok(())
  }

  fn entry_keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;
    let mut stmt =
      conn.prepare("SELECT method, url FROM entries WHERE store_name = ? ORDER BY url, method")?;

    let rows = stmt
      .query_map(params![store], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(method, url)| -> Result<RequestKey> {
        Ok(RequestKey {
          method: method.parse()?,
          url,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| ShellCacheError::StoreUnavailable(format!("Bad timestamp '{}': {}", s, e)))
}
