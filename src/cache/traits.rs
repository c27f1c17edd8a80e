//! Core types for the result cache.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::page::ResultPage;
use crate::query::CacheKey;

/// A cached page. Replaced wholesale on refresh, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: CacheKey,
  pub payload: Arc<ResultPage>,
  pub created_at: DateTime<Utc>,
  pub ttl: Duration,
}

impl CacheEntry {
  /// Create an entry stamped with the current time.
  pub fn new(key: CacheKey, payload: Arc<ResultPage>, ttl: Duration) -> Self {
    Self {
      key,
      payload,
      created_at: Utc::now(),
      ttl,
    }
  }

  /// When the entry stops being served.
  pub fn expires_at(&self) -> DateTime<Utc> {
    chrono::Duration::from_std(self.ttl)
      .ok()
      .and_then(|ttl| self.created_at.checked_add_signed(ttl))
      .unwrap_or(DateTime::<Utc>::MAX_UTC)
  }

  /// An entry whose age has reached its TTL is expired.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at()
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Freshly computed by the data source.
  pub fn from_source(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Source,
      cached_at: None,
    }
  }

  /// Served from a live cache entry.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Computed by the data source on a miss
  Source,
  /// Served from a cache entry within its TTL
  Cache,
}
