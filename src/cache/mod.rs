//! Result cache for computed pages.
//!
//! This module provides a time-bounded, concurrency-safe store that:
//! - Maps cache keys to paginated result payloads
//! - Expires entries lazily on read, with an optional background sweep
//! - Invalidates single keys or every page of a resource
//! - Degrades to a miss when the backing store fails

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheBackend, CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheResult, CacheSource};
