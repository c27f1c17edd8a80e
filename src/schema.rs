//! Resource schemas: the per-endpoint allow-list of fields and relations.
//!
//! A schema is resolved once when an endpoint is registered and never
//! consulted through reflection at request time.

use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::query::Value;

/// Declared type of a field, used to coerce raw filter operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
  String,
  Integer,
  Float,
  Boolean,
  #[serde(alias = "datetime", alias = "timestamp")]
  DateTime,
}

impl FieldType {
  pub fn name(&self) -> &'static str {
    match self {
      FieldType::String => "string",
      FieldType::Integer => "integer",
      FieldType::Float => "float",
      FieldType::Boolean => "boolean",
      FieldType::DateTime => "datetime",
    }
  }

  /// Coerce a raw request string into a typed value.
  ///
  /// The literal `null` coerces to [`Value::Null`] for every type.
  pub fn coerce(&self, raw: &str) -> Option<Value> {
    if raw == "null" {
      return Some(Value::Null);
    }
    match self {
      FieldType::String => Some(Value::Text(raw.to_string())),
      FieldType::Integer => raw.trim().parse().ok().map(Value::Int),
      FieldType::Float => raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::Float),
      FieldType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(Value::Bool(true)),
        "false" | "0" => Some(Value::Bool(false)),
        _ => None,
      },
      FieldType::DateTime => parse_timestamp(raw.trim()).map(Value::Timestamp),
    }
  }
}

/// Parse an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date as midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
    return Some(ts.with_timezone(&Utc));
  }
  NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldDef {
  #[serde(rename = "type")]
  pub ty: FieldType,
  /// `like` filters on this field match case-sensitively
  #[serde(default)]
  pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
  /// Zero or more related records point back at this one
  HasMany,
  /// This record points at exactly one related record
  BelongsTo,
}

/// How a relation joins: `related[foreign_field] == record[local_field]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelationDef {
  pub kind: RelationKind,
  pub local_field: String,
  pub foreign_field: String,
  /// Collection the relation resolves against; defaults to the relation name.
  #[serde(default)]
  pub resource: Option<String>,
}

impl RelationDef {
  pub fn has_many(local_field: &str, foreign_field: &str) -> Self {
    Self {
      kind: RelationKind::HasMany,
      local_field: local_field.to_string(),
      foreign_field: foreign_field.to_string(),
      resource: None,
    }
  }

  pub fn belongs_to(local_field: &str, foreign_field: &str) -> Self {
    Self {
      kind: RelationKind::BelongsTo,
      local_field: local_field.to_string(),
      foreign_field: foreign_field.to_string(),
      resource: None,
    }
  }

  pub fn in_resource(mut self, resource: &str) -> Self {
    self.resource = Some(resource.to_string());
    self
  }
}

fn default_primary_key() -> String {
  "id".to_string()
}

/// Everything the parser needs to validate a request for one resource.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceSchema {
  /// Resource identity; filled from the config map key when loaded from YAML.
  #[serde(default)]
  pub name: String,
  #[serde(default = "default_primary_key")]
  pub primary_key: String,
  /// Overrides the global page-size ceiling for this resource.
  #[serde(default)]
  pub max_page_size: Option<u32>,
  #[serde(default)]
  pub fields: BTreeMap<String, FieldDef>,
  #[serde(default)]
  pub relations: BTreeMap<String, RelationDef>,
}

impl ResourceSchema {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      primary_key: default_primary_key(),
      max_page_size: None,
      fields: BTreeMap::new(),
      relations: BTreeMap::new(),
    }
  }

  pub fn primary_key(mut self, field: &str) -> Self {
    self.primary_key = field.to_string();
    self
  }

  pub fn max_page_size(mut self, max: u32) -> Self {
    self.max_page_size = Some(max);
    self
  }

  pub fn field(mut self, name: &str, ty: FieldType) -> Self {
    self.fields.insert(
      name.to_string(),
      FieldDef {
        ty,
        case_sensitive: false,
      },
    );
    self
  }

  pub fn case_sensitive_field(mut self, name: &str, ty: FieldType) -> Self {
    self.fields.insert(
      name.to_string(),
      FieldDef {
        ty,
        case_sensitive: true,
      },
    );
    self
  }

  pub fn relation(mut self, name: &str, relation: RelationDef) -> Self {
    self.relations.insert(name.to_string(), relation);
    self
  }

  pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
    self.fields.get(name)
  }

  pub fn relation_def(&self, name: &str) -> Option<&RelationDef> {
    self.relations.get(name)
  }

  /// Check that the schema refers only to fields it declares.
  pub fn validate(&self) -> Result<()> {
    if self.name.is_empty() {
      return Err(eyre!("Resource schema has no name"));
    }
    // `:` ends the cache key prefix; `a:b` would share `a`'s pages
    if self.name.contains(':') {
      return Err(eyre!("Resource `{}`: names may not contain `:`", self.name));
    }
    if !self.fields.contains_key(&self.primary_key) {
      return Err(eyre!(
        "Resource `{}`: primary key `{}` is not a declared field",
        self.name,
        self.primary_key
      ));
    }
    if self.max_page_size == Some(0) {
      return Err(eyre!("Resource `{}`: max_page_size must be positive", self.name));
    }
    for (name, relation) in &self.relations {
      if !self.fields.contains_key(&relation.local_field) {
        return Err(eyre!(
          "Resource `{}`: relation `{}` joins on undeclared field `{}`",
          self.name,
          name,
          relation.local_field
        ));
      }
    }
    Ok(())
  }
}
