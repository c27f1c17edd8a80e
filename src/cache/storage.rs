//! Cache storage trait and its backends.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use super::traits::CacheEntry;
use crate::config::{CacheBackendKind, CacheConfig};
use crate::page::ResultPage;
use crate::query::CacheKey;

/// Trait for cache storage backends.
///
/// Implementations own their synchronization; callers never lock around them.
/// Expiry is the cache layer's job, so `get` returns entries regardless of age.
pub trait CacheStorage: Send + Sync {
  fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

  /// Insert or replace the entry under its key.
  fn put(&self, entry: CacheEntry) -> Result<()>;

  fn invalidate(&self, key: &CacheKey) -> Result<()>;

  /// Remove the entry under `key` only if it is still the one created at
  /// `created_at`. Returns whether anything was removed.
  fn evict(&self, key: &CacheKey, created_at: DateTime<Utc>) -> Result<bool>;

  /// Drop every entry whose key starts with `prefix`. Returns how many went.
  fn invalidate_prefix(&self, prefix: &str) -> Result<usize>;

  /// Drop every entry expired at `now`. Returns how many went.
  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _entry: CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn invalidate(&self, _key: &CacheKey) -> Result<()> {
    Ok(())
  }

  fn evict(&self, _key: &CacheKey, _created_at: DateTime<Utc>) -> Result<bool> {
    Ok(false)
  }

  fn invalidate_prefix(&self, _prefix: &str) -> Result<usize> {
    Ok(0)
  }

  fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
    Ok(0)
  }
}

/// Process-local storage. Payloads are shared, not copied, between readers.
#[derive(Default)]
pub struct MemoryStorage {
  entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.read().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let entries = self
      .entries
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn put(&self, entry: CacheEntry) -> Result<()> {
    let mut entries = self
      .entries
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(entry.key.clone(), entry);
    Ok(())
  }

  fn invalidate(&self, key: &CacheKey) -> Result<()> {
    let mut entries = self
      .entries
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }

  fn evict(&self, key: &CacheKey, created_at: DateTime<Utc>) -> Result<bool> {
    let mut entries = self
      .entries
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    match entries.get(key) {
      Some(entry) if entry.created_at == created_at => {
        entries.remove(key);
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
    let mut entries = self
      .entries
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = entries.len();
    entries.retain(|key, _| !key.as_str().starts_with(prefix));
    Ok(before - entries.len())
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let mut entries = self
      .entries
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired_at(now));
    Ok(before - entries.len())
  }
}

/// SQLite-based cache storage implementation.
///
/// Lets cached pages outlive the process and be shared by several processes
/// on one host.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A private database that lives as long as this storage.
  pub fn in_memory() -> Result<Self> {
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

    Ok(data_dir.join("resq").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cached page (payload is the serialized ResultPage)
CREATE TABLE IF NOT EXISTS page_cache (
    cache_key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL,
    ttl_ms INTEGER NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_page_cache_expires ON page_cache(expires_at);
"#;

/// Fixed-width UTC form, so stored timestamps compare correctly as text.
fn format_timestamp(ts: DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Expiry as stored; years past 9999 would break the text ordering.
fn storable_expiry(entry: &CacheEntry) -> DateTime<Utc> {
  let ceiling = NaiveDate::from_ymd_opt(9999, 12, 31)
    .and_then(|d| d.and_hms_opt(23, 59, 59))
    .map(|dt| dt.and_utc());
  match ceiling {
    Some(ceiling) => entry.expires_at().min(ceiling),
    None => entry.expires_at(),
  }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, String, i64)> = conn
      .query_row(
        "SELECT payload, created_at, ttl_ms FROM page_cache WHERE cache_key = ?",
        params![key.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cached page: {}", e))?;

    let Some((payload, created_at, ttl_ms)) = row else {
      return Ok(None);
    };

    let page: ResultPage = serde_json::from_slice(&payload)
      .map_err(|e| eyre!("Failed to deserialize cached page: {}", e))?;

    Ok(Some(CacheEntry {
      key: key.clone(),
      payload: Arc::new(page),
      created_at: parse_timestamp(&created_at)?,
      ttl: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
    }))
  }

  fn put(&self, entry: CacheEntry) -> Result<()> {
    let payload = serde_json::to_vec(entry.payload.as_ref())
      .map_err(|e| eyre!("Failed to serialize page: {}", e))?;
    let ttl_ms = i64::try_from(entry.ttl.as_millis()).unwrap_or(i64::MAX);

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO page_cache (cache_key, payload, created_at, ttl_ms, expires_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          entry.key.as_str(),
          payload,
          format_timestamp(entry.created_at),
          ttl_ms,
          format_timestamp(storable_expiry(&entry)),
        ],
      )
      .map_err(|e| eyre!("Failed to store page: {}", e))?;

    Ok(())
  }

  fn invalidate(&self, key: &CacheKey) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM page_cache WHERE cache_key = ?",
        params![key.as_str()],
      )
      .map_err(|e| eyre!("Failed to invalidate page: {}", e))?;

    Ok(())
  }

  fn evict(&self, key: &CacheKey, created_at: DateTime<Utc>) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute(
        "DELETE FROM page_cache WHERE cache_key = ? AND created_at = ?",
        params![key.as_str(), format_timestamp(created_at)],
      )
      .map_err(|e| eyre!("Failed to evict page: {}", e))?;

    Ok(removed > 0)
  }

  fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // substr instead of LIKE so `_` and `%` in resource names stay literal
    let removed = conn
      .execute(
        "DELETE FROM page_cache WHERE substr(cache_key, 1, ?1) = ?2",
        params![prefix.chars().count() as i64, prefix],
      )
      .map_err(|e| eyre!("Failed to invalidate pages: {}", e))?;

    Ok(removed)
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute(
        "DELETE FROM page_cache WHERE expires_at <= ?",
        params![format_timestamp(now)],
      )
      .map_err(|e| eyre!("Failed to purge expired pages: {}", e))?;

    Ok(removed)
  }
}

/// The storage a host selects through configuration.
pub enum CacheBackend {
  Memory(MemoryStorage),
  Sqlite(SqliteStorage),
  Disabled(NoopStorage),
}

impl CacheBackend {
  pub fn from_config(config: &CacheConfig) -> Result<Self> {
    Ok(match config.backend {
      CacheBackendKind::Memory => CacheBackend::Memory(MemoryStorage::new()),
      CacheBackendKind::Sqlite => match &config.sqlite_path {
        Some(path) => CacheBackend::Sqlite(SqliteStorage::open(path)?),
        None => CacheBackend::Sqlite(SqliteStorage::open_default()?),
      },
      CacheBackendKind::None => CacheBackend::Disabled(NoopStorage),
    })
  }

  fn inner(&self) -> &dyn CacheStorage {
    match self {
      CacheBackend::Memory(s) => s,
      CacheBackend::Sqlite(s) => s,
      CacheBackend::Disabled(s) => s,
    }
  }
}

impl CacheStorage for CacheBackend {
  fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
    self.inner().get(key)
  }

  fn put(&self, entry: CacheEntry) -> Result<()> {
    self.inner().put(entry)
  }

  fn invalidate(&self, key: &CacheKey) -> Result<()> {
    self.inner().invalidate(key)
  }

  fn evict(&self, key: &CacheKey, created_at: DateTime<Utc>) -> Result<bool> {
    self.inner().evict(key, created_at)
  }

  fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
    self.inner().invalidate_prefix(prefix)
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    self.inner().purge_expired(now)
  }
}
