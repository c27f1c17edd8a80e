//! Cache key derivation.

use sha2::{Digest, Sha256};
use std::fmt;

use super::QuerySpec;

/// Stable cache address for one resource's query: `<resource>:<sha256 hex>`.
///
/// The readable resource prefix lets every page of a resource be
/// invalidated at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  /// Prefix shared by every key derived for `resource`.
  pub fn resource_prefix(resource: &str) -> String {
    format!("{}:", resource)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn belongs_to(&self, resource: &str) -> bool {
    self.0.starts_with(&Self::resource_prefix(resource))
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Derive the cache key for `spec` under `resource`.
///
/// Purely a function of its inputs. Filters and sort keys keep their request
/// order; projected fields and expansions are already sorted sets.
pub fn derive_key(resource: &str, spec: &QuerySpec) -> CacheKey {
  let mut hasher = Sha256::new();
  hasher.update(canonical(resource, spec).as_bytes());
  let digest = hex::encode(hasher.finalize());
  CacheKey(format!("{}{}", CacheKey::resource_prefix(resource), digest))
}

/// Canonical text form; strings are debug-quoted so separators cannot collide.
fn canonical(resource: &str, spec: &QuerySpec) -> String {
  let filters: Vec<String> = spec
    .filters
    .iter()
    .map(|f| format!("{:?} {} {}", f.field, f.op.name(), f.value))
    .collect();
  let sort: Vec<String> = spec
    .sort
    .iter()
    .map(|s| format!("{:?} {}", s.field, s.direction.name()))
    .collect();

  format!(
    "resource={:?};filters=[{}];sort=[{}];fields={:?};expand={:?};page={};page_size={}",
    resource,
    filters.join(","),
    sort.join(","),
    spec.fields,
    spec.expand,
    spec.page,
    spec.page_size
  )
}
