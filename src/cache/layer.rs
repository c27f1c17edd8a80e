//! Cache layer that orchestrates caching logic with query execution.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheResult};
use crate::page::ResultPage;
use crate::query::CacheKey;

/// Cache layer that manages caching logic and query execution.
///
/// The cache is an optimization, never a dependency: storage failures are
/// logged and treated as misses, and the request proceeds against the data
/// source. Concurrent misses on one key each execute and each write the
/// result; the last write wins.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Share a storage the host already owns, e.g. one store for every endpoint.
  pub fn from_arc(storage: Arc<S>) -> Self {
    Self { storage }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Look up a live entry. Expired entries are evicted and reported as a miss.
  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    let entry = match self.storage.get(key) {
      Ok(entry) => entry?,
      Err(err) => {
        warn!(key = %key, error = %err, "cache read failed, treating as miss");
        return None;
      }
    };

    if entry.is_expired_at(Utc::now()) {
      debug!(key = %key, "evicting expired entry");
      // Only the entry we read; a concurrent refresh may already have replaced it
      if let Err(err) = self.storage.evict(key, entry.created_at) {
        warn!(key = %key, error = %err, "cache eviction failed");
      }
      return None;
    }
    Some(entry)
  }

  /// Store a page under `key`, replacing whatever was there.
  pub fn put(&self, key: CacheKey, payload: Arc<ResultPage>, ttl: Duration) {
    if let Err(err) = self.storage.put(CacheEntry::new(key.clone(), payload, ttl)) {
      warn!(key = %key, error = %err, "cache write failed");
    }
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - if live, return immediately
  /// 2. On a miss, run the fetcher
  /// 3. Store successful results; errors pass through and are never stored
  ///
  /// If the returned future is dropped while the fetcher is outstanding,
  /// nothing is stored.
  pub async fn fetch<F, Fut, E>(
    &self,
    key: &CacheKey,
    ttl: Duration,
    fetcher: F,
  ) -> Result<CacheResult<Arc<ResultPage>>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ResultPage, E>>,
  {
    if let Some(entry) = self.get(key) {
      debug!(key = %key, "cache hit");
      return Ok(CacheResult::from_cache(entry.payload, entry.created_at));
    }

    debug!(key = %key, "cache miss");
    let page = Arc::new(fetcher().await?);
    if !ttl.is_zero() {
      self.put(key.clone(), Arc::clone(&page), ttl);
    }
    Ok(CacheResult::from_source(page))
  }

  pub fn invalidate(&self, key: &CacheKey) {
    if let Err(err) = self.storage.invalidate(key) {
      warn!(key = %key, error = %err, "cache invalidation failed");
    }
  }

  /// Drop every cached page for `resource`.
  pub fn invalidate_resource(&self, resource: &str) -> usize {
    match self
      .storage
      .invalidate_prefix(&CacheKey::resource_prefix(resource))
    {
      Ok(removed) => {
        debug!(resource, removed, "invalidated resource");
        removed
      }
      Err(err) => {
        warn!(resource, error = %err, "cache invalidation failed");
        0
      }
    }
  }

  /// Drop expired entries now. Reads never depend on this.
  pub fn purge_expired(&self) -> usize {
    match self.storage.purge_expired(Utc::now()) {
      Ok(removed) => removed,
      Err(err) => {
        warn!(error = %err, "cache purge failed");
        0
      }
    }
  }
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Periodically purge expired entries to reclaim memory.
  ///
  /// Must be called from within a tokio runtime. Abort the handle to stop.
  pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
    let layer = self.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        let removed = layer.purge_expired();
        if removed > 0 {
          debug!(removed, "swept expired cache entries");
        }
      }
    })
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::cache::traits::CacheSource;
  use crate::page::assemble;
  use crate::query::{derive_key, QuerySpec};
  use chrono::DateTime;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn page() -> ResultPage {
    assemble(Vec::new(), Some(0), &QuerySpec::all(10))
  }

  fn key() -> CacheKey {
    derive_key("users", &QuerySpec::all(10))
  }

  /// Storage whose every operation fails, like an unreachable external store.
  struct BrokenStorage;

  impl CacheStorage for BrokenStorage {
    fn get(&self, _key: &CacheKey) -> color_eyre::Result<Option<CacheEntry>> {
      Err(eyre!("connection reset"))
    }

    fn put(&self, _entry: CacheEntry) -> color_eyre::Result<()> {
      Err(eyre!("connection reset"))
    }

    fn invalidate(&self, _key: &CacheKey) -> color_eyre::Result<()> {
      Err(eyre!("connection reset"))
    }

    fn evict(&self, _key: &CacheKey, _created_at: DateTime<Utc>) -> color_eyre::Result<bool> {
      Err(eyre!("connection reset"))
    }

    fn invalidate_prefix(&self, _prefix: &str) -> color_eyre::Result<usize> {
      Err(eyre!("connection reset"))
    }

    fn purge_expired(&self, _now: DateTime<Utc>) -> color_eyre::Result<usize> {
      Err(eyre!("connection reset"))
    }
  }

  #[tokio::test]
  async fn test_hit_skips_fetcher() {
    let layer = CacheLayer::new(MemoryStorage::new());
    let calls = AtomicUsize::new(0);
    let ttl = Duration::from_secs(60);

    for expected in [CacheSource::Source, CacheSource::Cache, CacheSource::Cache] {
      let result = layer
        .fetch(&key(), ttl, || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<_, String>(page())
        })
        .await
        .unwrap();
      assert_eq!(result.source, expected);
      assert_eq!(result.cached_at.is_some(), expected == CacheSource::Cache);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_errors_are_not_cached() {
    let layer = CacheLayer::new(MemoryStorage::new());
    let ttl = Duration::from_secs(60);

    let err = layer
      .fetch(&key(), ttl, || async { Err::<ResultPage, _>("boom") })
      .await
      .unwrap_err();
    assert_eq!(err, "boom");
    assert!(layer.storage().is_empty());

    let result = layer
      .fetch(&key(), ttl, || async { Ok::<_, &str>(page()) })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Source);
  }

  #[tokio::test]
  async fn test_expired_entry_is_a_miss_and_evicted() {
    let layer = CacheLayer::new(MemoryStorage::new());
    layer.put(key(), Arc::new(page()), Duration::ZERO);
    assert_eq!(layer.storage().len(), 1);

    assert!(layer.get(&key()).is_none());
    assert!(layer.storage().is_empty());
  }

  #[tokio::test]
  async fn test_eviction_spares_a_refreshed_entry() {
    let layer = CacheLayer::new(MemoryStorage::new());
    let mut stale = CacheEntry::new(key(), Arc::new(page()), Duration::from_secs(1));
    stale.created_at = Utc::now() - chrono::Duration::seconds(10);
    let fresh = CacheEntry::new(key(), Arc::new(page()), Duration::from_secs(60));

    layer.storage().put(stale.clone()).unwrap();
    // Another request refreshes the page after this one read the stale entry
    layer.storage().put(fresh.clone()).unwrap();
    assert!(!layer.storage().evict(&key(), stale.created_at).unwrap());

    let live = layer.get(&key()).unwrap();
    assert_eq!(live.created_at, fresh.created_at);
  }

  #[tokio::test]
  async fn test_zero_ttl_never_stores() {
    let layer = CacheLayer::new(MemoryStorage::new());
    layer
      .fetch(&key(), Duration::ZERO, || async { Ok::<_, String>(page()) })
      .await
      .unwrap();
    assert!(layer.storage().is_empty());
  }

  #[tokio::test]
  async fn test_broken_storage_degrades_to_source() {
    let layer = CacheLayer::new(BrokenStorage);
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
      let result = layer
        .fetch(&key(), Duration::from_secs(60), || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<_, String>(page())
        })
        .await
        .unwrap();
      assert_eq!(result.source, CacheSource::Source);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(layer.invalidate_resource("users"), 0);
  }

  #[tokio::test]
  async fn test_dropped_fetch_stores_nothing() {
    let layer = CacheLayer::new(MemoryStorage::new());
    let key = key();
    let pending = layer.fetch(&key, Duration::from_secs(60), || async {
      tokio::time::sleep(Duration::from_secs(30)).await;
      Ok::<_, String>(page())
    });
    let outcome = tokio::time::timeout(Duration::from_millis(10), pending).await;
    assert!(outcome.is_err());
    assert!(layer.storage().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_sweeper_purges_expired_entries() {
    let layer = CacheLayer::new(MemoryStorage::new());
    layer.put(key(), Arc::new(page()), Duration::ZERO);

    let sweeper = layer.spawn_sweeper(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(layer.storage().is_empty());
    sweeper.abort();
  }
}
