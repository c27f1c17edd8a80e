//! Query endpoints: one resource schema, one data source, one cache handle.
//!
//! An endpoint is resolved once at registration and then serves any number of
//! concurrent requests. The request flow is parse, derive key, look up the
//! cache, and on a miss execute against the source and store the page.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheLayer, CacheStorage};
use crate::config::{Config, Paging};
use crate::error::{EndpointError, ExecutionError, ParseError};
use crate::page::{Envelope, ResultPage};
use crate::plan;
use crate::query::{derive_key, parse, Filter, FilterOp, QuerySpec, RawParams};
use crate::schema::ResourceSchema;
use crate::source::{DataSource, Record};

#[derive(Debug, Clone)]
pub struct EndpointConfig {
  pub paging: Paging,
  /// How long computed pages stay servable
  pub ttl: Duration,
  /// Upper bound on one data source call
  pub timeout: Option<Duration>,
}

impl Default for EndpointConfig {
  fn default() -> Self {
    Self {
      paging: Paging::default(),
      ttl: Duration::from_secs(60),
      timeout: None,
    }
  }
}

impl From<&Config> for EndpointConfig {
  fn from(config: &Config) -> Self {
    Self {
      paging: config.paging,
      ttl: config.cache.ttl(),
      timeout: config.request_timeout(),
    }
  }
}

pub struct Endpoint<S: CacheStorage> {
  schema: Arc<ResourceSchema>,
  source: Arc<dyn DataSource>,
  cache: CacheLayer<S>,
  config: EndpointConfig,
}

impl<S: CacheStorage> Endpoint<S> {
  pub fn new(
    schema: ResourceSchema,
    source: Arc<dyn DataSource>,
    cache: CacheLayer<S>,
    config: EndpointConfig,
  ) -> Self {
    Self {
      schema: Arc::new(schema),
      source,
      cache,
      config,
    }
  }

  pub fn resource(&self) -> &str {
    &self.schema.name
  }

  pub fn schema(&self) -> &ResourceSchema {
    &self.schema
  }

  /// List records matching the request, one page at a time.
  ///
  /// Parse errors return before the cache or the source is touched.
  pub async fn index(&self, raw: &RawParams) -> Result<Envelope, EndpointError> {
    let spec = parse(raw, &self.schema, &self.config.paging)?;
    debug!(resource = %self.schema.name, page = spec.page, page_size = spec.page_size, "parsed request");
    let page = self.resolve(&spec).await?;
    Ok(Envelope::from(page.as_ref()))
  }

  /// Fetch one record by primary key. Only `fields` and `with`/`expand` apply.
  pub async fn show(&self, id: &str, raw: &RawParams) -> Result<Record, EndpointError> {
    let requested = parse(raw, &self.schema, &self.config.paging)?;
    let pk = &self.schema.primary_key;
    let def = self
      .schema
      .field_def(pk)
      .ok_or_else(|| ParseError::UnknownField { field: pk.clone() })?;
    let value = def.ty.coerce(id).ok_or_else(|| ParseError::TypeMismatch {
      field: pk.clone(),
      expected: def.ty.name(),
      value: id.to_string(),
    })?;

    let spec = QuerySpec {
      filters: vec![Filter::new(pk, FilterOp::Eq, value)],
      sort: Vec::new(),
      fields: requested.fields,
      expand: requested.expand,
      page: 1,
      page_size: 1,
    };

    let page = self.resolve(&spec).await?;
    page.items.first().cloned().ok_or_else(|| {
      ExecutionError::NotFound(format!("{} with {} = {}", self.schema.name, pk, id)).into()
    })
  }

  /// Drop every cached page of this resource. Call after writes.
  pub fn invalidate(&self) -> usize {
    self.cache.invalidate_resource(&self.schema.name)
  }

  async fn resolve(&self, spec: &QuerySpec) -> Result<Arc<ResultPage>, ExecutionError> {
    let key = derive_key(&self.schema.name, spec);
    let result = self
      .cache
      .fetch(&key, self.config.ttl, || self.execute(spec))
      .await?;
    debug!(
      key = %key,
      source = ?result.source,
      cached_at = ?result.cached_at,
      "resolved page"
    );
    Ok(result.data)
  }

  async fn execute(&self, spec: &QuerySpec) -> Result<ResultPage, ExecutionError> {
    info!(resource = %self.schema.name, page = spec.page, "querying data source");
    let run = plan::execute(self.source.as_ref(), &self.schema, spec);
    match self.config.timeout {
      // Dropping the timed-out future cancels the source call
      Some(limit) => tokio::time::timeout(limit, run)
        .await
        .map_err(|_| ExecutionError::Timeout(limit))?,
      None => run.await,
    }
  }
}

impl<S: CacheStorage> Clone for Endpoint<S> {
  fn clone(&self) -> Self {
    Self {
      schema: Arc::clone(&self.schema),
      source: Arc::clone(&self.source),
      cache: self.cache.clone(),
      config: self.config.clone(),
    }
  }
}

/// Endpoints by resource name, built once by the host at startup.
pub struct Registry<S: CacheStorage> {
  endpoints: BTreeMap<String, Endpoint<S>>,
}

impl<S: CacheStorage> Default for Registry<S> {
  fn default() -> Self {
    Self {
      endpoints: BTreeMap::new(),
    }
  }
}

impl<S: CacheStorage> Registry<S> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an endpoint under its resource name, replacing any previous one.
  pub fn register(&mut self, endpoint: Endpoint<S>) {
    self
      .endpoints
      .insert(endpoint.resource().to_string(), endpoint);
  }

  pub fn get(&self, resource: &str) -> Option<&Endpoint<S>> {
    self.endpoints.get(resource)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.endpoints.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.endpoints.len()
  }

  pub fn is_empty(&self) -> bool {
    self.endpoints.is_empty()
  }
}
