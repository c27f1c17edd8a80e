//! Request descriptor parsing.
//!
//! Turns raw request parameters into a validated [`QuerySpec`]:
//!
//! - `filter[<field>]=<op>:<value>` (op omitted means `eq`; `in` takes a
//!   comma-separated list)
//! - `sort=name:asc,-created` (repeatable)
//! - `fields=id,name`
//! - `with=posts` or `expand=posts`
//! - `page=2`, `pageSize=25` (also `page_size`, `per_page`)
//!
//! Unrecognized parameters are ignored and never influence the cache key.

use std::collections::BTreeSet;
use tracing::trace;

use super::{Direction, Filter, FilterOp, QuerySpec, SortKey, Value};
use crate::config::Paging;
use crate::error::ParseError;
use crate::schema::{FieldDef, FieldType, ResourceSchema};

/// Raw request parameters in arrival order. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParams(Vec<(String, String)>);

impl RawParams {
  pub fn new() -> Self {
    Self::default()
  }

  /// Decode an `application/x-www-form-urlencoded` query string.
  ///
  /// A leading `?` is tolerated.
  pub fn from_query_string(query: &str) -> Self {
    let query = query.strip_prefix('?').unwrap_or(query);
    url::form_urlencoded::parse(query.as_bytes())
      .into_owned()
      .collect()
  }

  pub fn with(mut self, key: &str, value: &str) -> Self {
    self.push(key, value);
    self
  }

  pub fn push(&mut self, key: &str, value: &str) {
    self.0.push((key.to_string(), value.to_string()));
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawParams {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(
      iter
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

/// Validate raw parameters against a resource schema.
///
/// Page numbers and sizes are clamped rather than rejected; anything that
/// names a field or relation the schema does not declare is an error.
pub fn parse(
  raw: &RawParams,
  schema: &ResourceSchema,
  paging: &Paging,
) -> Result<QuerySpec, ParseError> {
  let mut filters = Vec::new();
  let mut sort = Vec::new();
  let mut fields = BTreeSet::new();
  let mut expand = BTreeSet::new();
  let mut page = None;
  let mut page_size = None;

  for (key, value) in raw.iter() {
    if let Some(rest) = key.strip_prefix("filter[") {
      let field = rest
        .strip_suffix(']')
        .filter(|f| !f.is_empty())
        .ok_or_else(|| malformed(key, "expected `filter[<field>]`"))?;
      filters.push(parse_filter(field, value, schema)?);
      continue;
    }

    match key {
      "sort" => {
        for item in split_list(value) {
          sort.push(parse_sort_key(item, schema)?);
        }
      }
      "fields" => {
        for name in split_list(value) {
          field_def(schema, name)?;
          fields.insert(name.to_string());
        }
      }
      "with" | "expand" => {
        for name in split_list(value) {
          if schema.relation_def(name).is_none() {
            return Err(ParseError::UnknownRelation {
              relation: name.to_string(),
            });
          }
          expand.insert(name.to_string());
        }
      }
      "page" => page = Some(value),
      "pageSize" | "page_size" | "per_page" => page_size = Some(value),
      _ => trace!(param = key, "ignoring unrecognized parameter"),
    }
  }

  let max_page_size = schema
    .max_page_size
    .unwrap_or(paging.max_page_size)
    .max(1);
  let default_page_size = paging.default_page_size.clamp(1, max_page_size);

  let page = page
    .and_then(parse_number)
    .map(|n| n.clamp(1, i64::from(u32::MAX)) as u32)
    .unwrap_or(1);
  let page_size = page_size
    .and_then(parse_number)
    .map(|n| n.clamp(1, i64::from(max_page_size)) as u32)
    .unwrap_or(default_page_size);

  Ok(QuerySpec {
    filters,
    sort,
    fields,
    expand,
    page,
    page_size,
  })
}

fn parse_filter(field: &str, raw: &str, schema: &ResourceSchema) -> Result<Filter, ParseError> {
  let def = field_def(schema, field)?;

  let (op, operand) = match raw.split_once(':') {
    Some((prefix, rest)) => match FilterOp::from_name(prefix) {
      Some(op) => (op, rest),
      None => (FilterOp::Eq, raw),
    },
    None => (FilterOp::Eq, raw),
  };

  let value = match op {
    FilterOp::In => Value::List(
      split_list(operand)
        .map(|item| coerce(field, def, unquote(item)))
        .collect::<Result<_, _>>()?,
    ),
    FilterOp::Like if def.ty != FieldType::String => {
      return Err(malformed(
        &format!("filter[{}]", field),
        "`like` applies to string fields only",
      ));
    }
    // A substring is always text, even one spelled `null`
    FilterOp::Like => Value::Text(unquote(operand).to_string()),
    FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte => {
      match coerce(field, def, unquote(operand))? {
        Value::Null => {
          return Err(ParseError::TypeMismatch {
            field: field.to_string(),
            expected: def.ty.name(),
            value: unquote(operand).to_string(),
          })
        }
        value => value,
      }
    }
    FilterOp::Eq => coerce(field, def, unquote(operand))?,
  };

  Ok(Filter {
    field: field.to_string(),
    op,
    value,
  })
}

fn parse_sort_key(item: &str, schema: &ResourceSchema) -> Result<SortKey, ParseError> {
  let (field, direction) = if let Some(field) = item.strip_prefix('-') {
    (field, Direction::Desc)
  } else if let Some((field, dir)) = item.split_once(':') {
    let direction = match dir.trim().to_ascii_lowercase().as_str() {
      "asc" => Direction::Asc,
      "desc" => Direction::Desc,
      other => {
        return Err(malformed(
          "sort",
          &format!("unknown direction `{}`", other),
        ))
      }
    };
    (field, direction)
  } else {
    (item, Direction::Asc)
  };

  let field = field.trim();
  if field.is_empty() {
    return Err(malformed("sort", "empty field name"));
  }
  field_def(schema, field)?;

  Ok(SortKey {
    field: field.to_string(),
    direction,
  })
}

fn field_def<'a>(schema: &'a ResourceSchema, field: &str) -> Result<&'a FieldDef, ParseError> {
  schema
    .field_def(field)
    .ok_or_else(|| ParseError::UnknownField {
      field: field.to_string(),
    })
}

fn coerce(field: &str, def: &FieldDef, raw: &str) -> Result<Value, ParseError> {
  def.ty.coerce(raw).ok_or_else(|| ParseError::TypeMismatch {
    field: field.to_string(),
    expected: def.ty.name(),
    value: raw.to_string(),
  })
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
  raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Strip one pair of surrounding double quotes.
fn unquote(raw: &str) -> &str {
  raw
    .strip_prefix('"')
    .and_then(|s| s.strip_suffix('"'))
    .unwrap_or(raw)
}

fn parse_number(raw: &str) -> Option<i64> {
  raw.trim().parse().ok()
}

fn malformed(param: &str, reason: &str) -> ParseError {
  ParseError::Malformed {
    param: param.to_string(),
    reason: reason.to_string(),
  }
}
