#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resq::cache::{CacheEntry, CacheLayer, CacheStorage};
use resq::schema::RelationDef;
use resq::{
  CacheKey, DataSource, Endpoint, EndpointConfig, FieldType, InMemorySource, Paging, Record,
  ResourceSchema, SourceError, SourceQuery, SourceResult,
};

pub const NAMES: [&str; 12] = [
  "Walter", "Bob", "Sally", "Carol", "Alan", "Dave", "Eve", "Albert", "Frank", "Grace", "Heidi",
  "Ivan",
];

pub fn users_schema() -> ResourceSchema {
  ResourceSchema::new("users")
    .field("id", FieldType::Integer)
    .field("name", FieldType::String)
    .case_sensitive_field("email", FieldType::String)
    .field("age", FieldType::Integer)
    .relation("posts", RelationDef::has_many("id", "user_id"))
}

/// Twelve users; exactly four names contain "al" in any case.
pub fn users() -> Vec<Record> {
  NAMES
    .iter()
    .enumerate()
    .map(|(i, name)| {
      Record::default()
        .with("id", i as i64 + 1)
        .with("name", *name)
        .with("email", format!("{}@example.com", name.to_lowercase()))
        .with("age", 20 + (i as i64 * 3) % 17)
    })
    .collect()
}

pub fn numbered(n: usize) -> Vec<Record> {
  (1..=n)
    .map(|i| Record::default().with("id", i as i64).with("name", format!("user{:02}", i)))
    .collect()
}

pub fn posts() -> Vec<Record> {
  vec![
    json!({"id": 100, "user_id": 1, "title": "first"}),
    json!({"id": 101, "user_id": 1, "title": "second"}),
    json!({"id": 102, "user_id": 5, "title": "third"}),
  ]
  .into_iter()
  .filter_map(Record::from_json)
  .collect()
}

pub fn paging() -> Paging {
  Paging {
    default_page_size: 15,
    max_page_size: 100,
  }
}

pub fn config() -> EndpointConfig {
  EndpointConfig {
    paging: paging(),
    ttl: Duration::from_secs(60),
    timeout: None,
  }
}

/// Wraps a source, counting calls and optionally delaying each one.
pub struct CountingSource<D> {
  inner: D,
  calls: AtomicUsize,
  delay: Option<Duration>,
}

impl<D: DataSource> CountingSource<D> {
  pub fn new(inner: D) -> Self {
    Self {
      inner,
      calls: AtomicUsize::new(0),
      delay: None,
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl<D: DataSource> DataSource for CountingSource<D> {
  async fn query(&self, query: &SourceQuery) -> Result<SourceResult, SourceError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self.inner.query(query).await
  }
}

pub struct UnavailableSource;

#[async_trait]
impl DataSource for UnavailableSource {
  async fn query(&self, _query: &SourceQuery) -> Result<SourceResult, SourceError> {
    Err(SourceError::Unavailable("connection refused".to_string()))
  }
}

/// A cache store that is never reachable.
pub struct UnreachableStorage;

impl CacheStorage for UnreachableStorage {
  fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
    Err(eyre!("cache host unreachable"))
  }

  fn put(&self, _entry: CacheEntry) -> Result<()> {
    Err(eyre!("cache host unreachable"))
  }

  fn invalidate(&self, _key: &CacheKey) -> Result<()> {
    Err(eyre!("cache host unreachable"))
  }

  fn evict(&self, _key: &CacheKey, _created_at: DateTime<Utc>) -> Result<bool> {
    Err(eyre!("cache host unreachable"))
  }

  fn invalidate_prefix(&self, _prefix: &str) -> Result<usize> {
    Err(eyre!("cache host unreachable"))
  }

  fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
    Err(eyre!("cache host unreachable"))
  }
}

pub fn counted_users() -> Arc<CountingSource<InMemorySource>> {
  Arc::new(CountingSource::new(
    InMemorySource::new(users()).with_relation("posts", posts()),
  ))
}

pub fn endpoint_over<S: CacheStorage>(
  source: Arc<dyn DataSource>,
  cache: CacheLayer<S>,
) -> Endpoint<S> {
  Endpoint::new(users_schema(), source, cache, config())
}
