//! The data source collaborator.
//!
//! The core never knows how records are stored. It hands a [`DataSource`] one
//! fully-planned [`SourceQuery`] per request and gets back the page of items,
//! plus a total count when the source can supply one cheaply.

pub mod memory;

pub use memory::InMemorySource;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::query::{Direction, FilterOp, SortKey, Value};
use crate::schema::{FieldType, RelationDef};

/// A field-addressable unit from the data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub fields: BTreeMap<String, serde_json::Value>,
  /// Expanded related records, keyed by relation name
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub relations: BTreeMap<String, Vec<Record>>,
}

impl Record {
  /// Build a record from a JSON object. Returns `None` for any other JSON value.
  pub fn from_json(value: serde_json::Value) -> Option<Self> {
    match value {
      serde_json::Value::Object(map) => Some(Self {
        fields: map.into_iter().collect(),
        relations: BTreeMap::new(),
      }),
      _ => None,
    }
  }

  pub fn with(mut self, field: &str, value: impl Into<serde_json::Value>) -> Self {
    self.fields.insert(field.to_string(), value.into());
    self
  }

  pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
    self.fields.get(field)
  }

  /// Copy of this record restricted to `fields`; an empty set keeps everything.
  pub fn project(&self, fields: &BTreeSet<String>) -> Self {
    if fields.is_empty() {
      return self.clone();
    }
    Self {
      fields: self
        .fields
        .iter()
        .filter(|(name, _)| fields.contains(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect(),
      relations: self.relations.clone(),
    }
  }

  /// Flattened JSON form: fields, then each relation as an array under its name.
  pub fn to_json(&self) -> serde_json::Value {
    let mut map: serde_json::Map<String, serde_json::Value> = self
      .fields
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    for (name, related) in &self.relations {
      map.insert(
        name.clone(),
        serde_json::Value::Array(related.iter().map(Record::to_json).collect()),
      );
    }
    serde_json::Value::Object(map)
  }
}

/// One filter condition, with the schema's case rule already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
  pub field: String,
  pub op: FilterOp,
  pub value: Value,
  pub case_sensitive: bool,
}

/// One sort key with the field's declared type, so stored values order by
/// what they mean rather than how they are written.
#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
  pub field: String,
  pub direction: Direction,
  pub ty: FieldType,
}

impl SortField {
  pub fn new(key: &SortKey, ty: FieldType) -> Self {
    Self {
      field: key.field.clone(),
      direction: key.direction,
      ty,
    }
  }
}

/// A relation to load alongside each returned record.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
  pub name: String,
  pub relation: RelationDef,
}

/// Everything a source needs to answer one request in a single round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
  /// ANDed together
  pub predicates: Vec<Predicate>,
  /// Empty means all fields
  pub projection: BTreeSet<String>,
  pub expansions: Vec<Expansion>,
  pub sort: Vec<SortField>,
  pub offset: u64,
  pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceResult {
  pub items: Vec<Record>,
  /// Total matches before pagination, when cheap to compute
  pub total: Option<u64>,
}

/// No matching records is an empty result, never an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
  #[error("source unavailable: {0}")]
  Unavailable(String),
  #[error("{0}")]
  NotFound(String),
}

#[async_trait]
pub trait DataSource: Send + Sync {
  /// Answer a planned query. Retrying is the implementation's own business.
  async fn query(&self, query: &SourceQuery) -> Result<SourceResult, SourceError>;
}
