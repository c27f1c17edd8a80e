//! Canonical query specifications.
//!
//! A [`QuerySpec`] is what a request asks for once the raw parameters have
//! been validated against a [`ResourceSchema`](crate::schema::ResourceSchema).
//! Filter and sort order is preserved exactly as given, since it changes the
//! result; projected fields and expansions are sets.

mod key;
mod parse;

pub use key::{derive_key, CacheKey};
pub use parse::{parse, RawParams};

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeSet;
use std::fmt;

/// A typed filter operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
  Timestamp(DateTime<Utc>),
  /// Only produced for `in` filters
  List(Vec<Value>),
}

impl fmt::Display for Value {
  /// Tagged, unambiguous rendering used for cache keys.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => write!(f, "null"),
      Value::Bool(b) => write!(f, "b:{}", b),
      Value::Int(i) => write!(f, "i:{}", i),
      Value::Float(x) => write!(f, "f:{:?}", x),
      Value::Text(s) => write!(f, "s:{:?}", s),
      Value::Timestamp(ts) => write!(
        f,
        "t:{}",
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
      ),
      Value::List(items) => {
        write!(f, "[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            write!(f, ",")?;
          }
          write!(f, "{}", item)?;
        }
        write!(f, "]")
      }
    }
  }
}

/// The closed set of filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
  Eq,
  /// Substring match; `contains` is accepted as an alias
  Like,
  Lt,
  Lte,
  Gt,
  Gte,
  In,
}

impl FilterOp {
  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "eq" => Some(FilterOp::Eq),
      "like" | "contains" => Some(FilterOp::Like),
      "lt" => Some(FilterOp::Lt),
      "lte" => Some(FilterOp::Lte),
      "gt" => Some(FilterOp::Gt),
      "gte" => Some(FilterOp::Gte),
      "in" => Some(FilterOp::In),
      _ => None,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      FilterOp::Eq => "eq",
      FilterOp::Like => "like",
      FilterOp::Lt => "lt",
      FilterOp::Lte => "lte",
      FilterOp::Gt => "gt",
      FilterOp::Gte => "gte",
      FilterOp::In => "in",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
  pub field: String,
  pub op: FilterOp,
  pub value: Value,
}

impl Filter {
  pub fn new(field: &str, op: FilterOp, value: Value) -> Self {
    Self {
      field: field.to_string(),
      op,
      value,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
  #[default]
  Asc,
  Desc,
}

impl Direction {
  pub fn name(&self) -> &'static str {
    match self {
      Direction::Asc => "asc",
      Direction::Desc => "desc",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
  pub field: String,
  pub direction: Direction,
}

impl SortKey {
  pub fn asc(field: &str) -> Self {
    Self {
      field: field.to_string(),
      direction: Direction::Asc,
    }
  }

  pub fn desc(field: &str) -> Self {
    Self {
      field: field.to_string(),
      direction: Direction::Desc,
    }
  }
}

/// One request's data-retrieval intent, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
  /// ANDed together, in request order
  pub filters: Vec<Filter>,
  /// Applied left to right, in request order
  pub sort: Vec<SortKey>,
  /// Projected fields; empty means all fields
  pub fields: BTreeSet<String>,
  /// Relations to include with each record
  pub expand: BTreeSet<String>,
  /// 1-based
  pub page: u32,
  pub page_size: u32,
}

impl QuerySpec {
  /// All records, default order, first page.
  pub fn all(page_size: u32) -> Self {
    Self {
      filters: Vec::new(),
      sort: Vec::new(),
      fields: BTreeSet::new(),
      expand: BTreeSet::new(),
      page: 1,
      page_size: page_size.max(1),
    }
  }

  /// Number of records that precede this page.
  pub fn offset(&self) -> u64 {
    u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
  }
}
