//! # resq
//!
//! A cached, schema-validated query endpoint core. Hosts register a resource
//! schema and a data source once, then hand each request's raw parameters to
//! the endpoint and get back a page of results:
//!
//! ```ignore
//! use std::sync::Arc;
//! use resq::{CacheLayer, Endpoint, EndpointConfig, FieldType, InMemorySource, MemoryStorage,
//!            RawParams, ResourceSchema};
//!
//! let schema = ResourceSchema::new("users")
//!     .field("id", FieldType::Integer)
//!     .field("name", FieldType::String);
//! let cache = CacheLayer::new(MemoryStorage::new());
//! let users = Endpoint::new(schema, Arc::new(InMemorySource::new(records)), cache,
//!                           EndpointConfig::default());
//!
//! let raw = RawParams::from_query_string("filter[name]=contains:al&sort=name:asc&page=2");
//! let envelope = users.index(&raw).await?;
//! ```
//!
//! Identical requests share a cache entry keyed on the validated query, not
//! on the URL, so irrelevant parameters never fragment the cache.

pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod page;
pub mod plan;
pub mod query;
pub mod schema;
pub mod source;

pub use cache::{CacheBackend, CacheLayer, CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use config::{Config, Paging};
pub use endpoint::{Endpoint, EndpointConfig, Registry};
pub use error::{EndpointError, ErrorKind, ErrorResponse, ExecutionError, ParseError};
pub use page::{Envelope, ResultPage};
pub use query::{derive_key, parse, CacheKey, QuerySpec, RawParams};
pub use schema::{FieldType, RelationDef, ResourceSchema};
pub use source::{
  DataSource, InMemorySource, Record, SortField, SourceError, SourceQuery, SourceResult,
};
