//! In-memory data source over JSON records.
//!
//! Evaluates the full predicate, sort, projection and expansion vocabulary,
//! so hosts without a database (and the tests) have a faithful source to run
//! against. Projection and expansion are materialized only for the rows that
//! survive pagination, which yields the same output as applying them first.

use async_trait::async_trait;
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use super::{
  DataSource, Expansion, Predicate, Record, SortField, SourceError, SourceQuery, SourceResult,
};
use crate::query::{Direction, FilterOp, Value};
use crate::schema::{parse_timestamp, FieldType, RelationKind};

pub struct InMemorySource {
  records: Vec<Record>,
  /// Related collections, keyed by relation name
  related: BTreeMap<String, Vec<Record>>,
  report_total: bool,
}

impl InMemorySource {
  pub fn new(records: Vec<Record>) -> Self {
    Self {
      records,
      related: BTreeMap::new(),
      report_total: true,
    }
  }

  /// Register the collection a relation resolves against.
  pub fn with_relation(mut self, name: &str, records: Vec<Record>) -> Self {
    self.related.insert(name.to_string(), records);
    self
  }

  /// Stop reporting total counts, as a source with expensive counts would.
  pub fn without_total(mut self) -> Self {
    self.report_total = false;
    self
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Evaluate a query synchronously.
  pub fn run(&self, query: &SourceQuery) -> Result<SourceResult, SourceError> {
    let mut rows: Vec<&Record> = self
      .records
      .iter()
      .filter(|record| query.predicates.iter().all(|p| matches(record, p)))
      .collect();
    let total = rows.len() as u64;

    // Stable, so equal keys keep collection order
    rows.sort_by(|a, b| compare_records(a, b, &query.sort));

    let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
    let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
    let page: Vec<&Record> = rows.into_iter().skip(offset).take(limit).collect();

    let mut items: Vec<Record> = page
      .iter()
      .map(|record| record.project(&query.projection))
      .collect();

    for expansion in &query.expansions {
      let related = self
        .related
        .get(&expansion.name)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
      let index = index_by(related, &expansion.relation.foreign_field);
      for (row, item) in page.iter().zip(items.iter_mut()) {
        let joined = join(row, expansion, &index)?;
        item.relations.insert(expansion.name.clone(), joined);
      }
    }

    Ok(SourceResult {
      items,
      total: self.report_total.then_some(total),
    })
  }
}

#[async_trait]
impl DataSource for InMemorySource {
  async fn query(&self, query: &SourceQuery) -> Result<SourceResult, SourceError> {
    self.run(query)
  }
}

fn matches(record: &Record, predicate: &Predicate) -> bool {
  let actual = record.get(&predicate.field).unwrap_or(&Json::Null);
  let ord = || compare_value(actual, &predicate.value);
  match predicate.op {
    FilterOp::Eq => ord() == Some(Ordering::Equal),
    FilterOp::Lt => ord() == Some(Ordering::Less),
    FilterOp::Lte => matches!(ord(), Some(Ordering::Less | Ordering::Equal)),
    FilterOp::Gt => ord() == Some(Ordering::Greater),
    FilterOp::Gte => matches!(ord(), Some(Ordering::Greater | Ordering::Equal)),
    FilterOp::Like => like(actual, &predicate.value, predicate.case_sensitive),
    FilterOp::In => match &predicate.value {
      Value::List(items) => items
        .iter()
        .any(|item| compare_value(actual, item) == Some(Ordering::Equal)),
      other => compare_value(actual, other) == Some(Ordering::Equal),
    },
  }
}

fn like(actual: &Json, needle: &Value, case_sensitive: bool) -> bool {
  match (actual, needle) {
    (Json::String(haystack), Value::Text(needle)) => {
      if case_sensitive {
        haystack.contains(needle.as_str())
      } else {
        haystack
          .to_lowercase()
          .contains(&needle.to_lowercase())
      }
    }
    _ => false,
  }
}

/// Order a stored value against a typed operand; `None` when incomparable.
fn compare_value(actual: &Json, expected: &Value) -> Option<Ordering> {
  match (actual, expected) {
    (Json::Null, Value::Null) => Some(Ordering::Equal),
    (Json::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
    (Json::Number(n), Value::Int(i)) => match n.as_i64() {
      Some(a) => Some(a.cmp(i)),
      None => n.as_f64()?.partial_cmp(&(*i as f64)),
    },
    (Json::Number(n), Value::Float(x)) => n.as_f64()?.partial_cmp(x),
    (Json::String(s), Value::Text(t)) => Some(s.as_str().cmp(t.as_str())),
    (Json::String(s), Value::Timestamp(t)) => parse_timestamp(s).map(|ts| ts.cmp(t)),
    _ => None,
  }
}

fn compare_records(a: &Record, b: &Record, sort: &[SortField]) -> Ordering {
  for key in sort {
    let (x, y) = (a.get(&key.field), b.get(&key.field));
    let ord = match key.ty {
      FieldType::DateTime => compare_instants(x, y),
      _ => compare_json(x, y),
    };
    let ord = match key.direction {
      Direction::Asc => ord,
      Direction::Desc => ord.reverse(),
    };
    if ord != Ordering::Equal {
      return ord;
    }
  }
  Ordering::Equal
}

/// Datetimes order by instant whatever their offset; unparseable values
/// sort first, like nulls.
fn compare_instants(a: Option<&Json>, b: Option<&Json>) -> Ordering {
  let instant = |v: Option<&Json>| v.and_then(Json::as_str).and_then(parse_timestamp);
  instant(a).cmp(&instant(b))
}

/// Total order over stored values: missing and null sort first.
fn compare_json(a: Option<&Json>, b: Option<&Json>) -> Ordering {
  fn rank(v: Option<&Json>) -> u8 {
    match v {
      None | Some(Json::Null) => 0,
      Some(Json::Bool(_)) => 1,
      Some(Json::Number(_)) => 2,
      Some(Json::String(_)) => 3,
      Some(Json::Array(_)) => 4,
      Some(Json::Object(_)) => 5,
    }
  }

  match (a, b) {
    (Some(Json::Bool(x)), Some(Json::Bool(y))) => x.cmp(y),
    (Some(Json::Number(x)), Some(Json::Number(y))) => match (x.as_i64(), y.as_i64()) {
      (Some(x), Some(y)) => x.cmp(&y),
      _ => x
        .as_f64()
        .zip(y.as_f64())
        .and_then(|(x, y)| x.partial_cmp(&y))
        .unwrap_or(Ordering::Equal),
    },
    (Some(Json::String(x)), Some(Json::String(y))) => x.cmp(y),
    _ => rank(a).cmp(&rank(b)),
  }
}

fn join_key(value: &Json) -> Option<String> {
  match value {
    Json::Null => None,
    other => Some(other.to_string()),
  }
}

fn index_by<'a>(records: &'a [Record], field: &str) -> HashMap<String, Vec<&'a Record>> {
  let mut index: HashMap<String, Vec<&Record>> = HashMap::new();
  for record in records {
    if let Some(key) = record.get(field).and_then(join_key) {
      index.entry(key).or_default().push(record);
    }
  }
  index
}

fn join(
  row: &Record,
  expansion: &Expansion,
  index: &HashMap<String, Vec<&Record>>,
) -> Result<Vec<Record>, SourceError> {
  let relation = &expansion.relation;
  let Some(local) = row.get(&relation.local_field).and_then(join_key) else {
    return Ok(Vec::new());
  };
  let found: Vec<Record> = index
    .get(&local)
    .map(|records| records.iter().map(|r| (*r).clone()).collect())
    .unwrap_or_default();

  match relation.kind {
    RelationKind::HasMany => Ok(found),
    RelationKind::BelongsTo => {
      if found.is_empty() {
        return Err(SourceError::NotFound(format!(
          "no `{}` record with {} = {}",
          expansion.name, relation.foreign_field, local
        )));
      }
      Ok(found.into_iter().take(1).collect())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query::SortKey;
  use crate::schema::RelationDef;
  use serde_json::json;
  use std::collections::BTreeSet;

  fn people() -> Vec<Record> {
    vec![
      json!({"id": 1, "name": "Alice", "age": 31, "team_id": 1, "joined": "2023-01-10T00:00:00Z"}),
      json!({"id": 2, "name": "bob", "age": 25, "team_id": 2, "joined": "2022-06-01T00:00:00Z"}),
      json!({"id": 3, "name": "Carol", "age": 31, "team_id": null, "joined": "2024-02-29T00:00:00Z"}),
      json!({"id": 4, "name": "Dave", "age": 19, "team_id": 1}),
    ]
    .into_iter()
    .filter_map(Record::from_json)
    .collect()
  }

  fn teams() -> Vec<Record> {
    vec![json!({"id": 1, "title": "Core"}), json!({"id": 2, "title": "Edge"})]
      .into_iter()
      .filter_map(Record::from_json)
      .collect()
  }

  fn query() -> SourceQuery {
    SourceQuery {
      predicates: Vec::new(),
      projection: BTreeSet::new(),
      expansions: Vec::new(),
      sort: Vec::new(),
      offset: 0,
      limit: 100,
    }
  }

  fn predicate(field: &str, op: FilterOp, value: Value) -> Predicate {
    Predicate {
      field: field.to_string(),
      op,
      value,
      case_sensitive: false,
    }
  }

  fn sort(key: SortKey, ty: FieldType) -> SortField {
    SortField::new(&key, ty)
  }

  fn ids(result: &SourceResult) -> Vec<i64> {
    result
      .items
      .iter()
      .filter_map(|r| r.get("id").and_then(Json::as_i64))
      .collect()
  }

  #[test]
  fn test_comparison_operators() {
    let source = InMemorySource::new(people());
    let cases = [
      (FilterOp::Eq, 31, vec![1, 3]),
      (FilterOp::Lt, 25, vec![4]),
      (FilterOp::Lte, 25, vec![2, 4]),
      (FilterOp::Gt, 25, vec![1, 3]),
      (FilterOp::Gte, 25, vec![1, 2, 3]),
    ];
    for (op, age, expected) in cases {
      let mut q = query();
      q.predicates = vec![predicate("age", op, Value::Int(age))];
      assert_eq!(ids(&source.run(&q).unwrap()), expected, "{:?}", op);
    }
  }

  #[test]
  fn test_predicates_are_anded() {
    let source = InMemorySource::new(people());
    let mut q = query();
    q.predicates = vec![
      predicate("age", FilterOp::Eq, Value::Int(31)),
      predicate("name", FilterOp::Like, Value::Text("car".to_string())),
    ];
    assert_eq!(ids(&source.run(&q).unwrap()), vec![3]);
  }

  #[test]
  fn test_like_respects_case_rule() {
    let source = InMemorySource::new(people());
    let mut q = query();
    q.predicates = vec![predicate("name", FilterOp::Like, Value::Text("B".to_string()))];
    assert_eq!(ids(&source.run(&q).unwrap()), vec![2]);

    q.predicates[0].case_sensitive = true;
    assert!(source.run(&q).unwrap().items.is_empty());
  }

  #[test]
  fn test_in_and_null() {
    let source = InMemorySource::new(people());
    let mut q = query();
    q.predicates = vec![predicate(
      "id",
      FilterOp::In,
      Value::List(vec![Value::Int(4), Value::Int(2), Value::Int(99)]),
    )];
    assert_eq!(ids(&source.run(&q).unwrap()), vec![2, 4]);

    q.predicates = vec![predicate("team_id", FilterOp::Eq, Value::Null)];
    assert_eq!(ids(&source.run(&q).unwrap()), vec![3]);
  }

  #[test]
  fn test_timestamp_filter() {
    let source = InMemorySource::new(people());
    let mut q = query();
    q.predicates = vec![predicate(
      "joined",
      FilterOp::Gte,
      Value::Timestamp(parse_timestamp("2023-01-01").unwrap()),
    )];
    assert_eq!(ids(&source.run(&q).unwrap()), vec![1, 3]);
  }

  #[test]
  fn test_datetime_sort_agrees_with_filter() {
    let records: Vec<Record> = vec![
      json!({"id": 1, "at": "2024-03-01T00:30:00Z"}),
      json!({"id": 2, "at": "2024-03-01T02:00:00+02:00"}),
      json!({"id": 3, "at": null}),
    ]
    .into_iter()
    .filter_map(Record::from_json)
    .collect();
    let source = InMemorySource::new(records);

    let mut q = query();
    q.sort = vec![sort(SortKey::asc("at"), FieldType::DateTime)];
    assert_eq!(ids(&source.run(&q).unwrap()), vec![3, 2, 1]);

    q.sort = vec![sort(SortKey::desc("at"), FieldType::DateTime)];
    assert_eq!(ids(&source.run(&q).unwrap()), vec![1, 2, 3]);

    q.sort = Vec::new();
    q.predicates = vec![predicate(
      "at",
      FilterOp::Lt,
      Value::Timestamp(parse_timestamp("2024-03-01T00:15:00Z").unwrap()),
    )];
    assert_eq!(ids(&source.run(&q).unwrap()), vec![2]);
  }

  #[test]
  fn test_multi_key_sort_and_window() {
    let source = InMemorySource::new(people());
    let mut q = query();
    q.sort = vec![
      sort(SortKey::desc("age"), FieldType::Integer),
      sort(SortKey::asc("name"), FieldType::String),
    ];
    assert_eq!(ids(&source.run(&q).unwrap()), vec![1, 3, 2, 4]);

    q.offset = 1;
    q.limit = 2;
    let result = source.run(&q).unwrap();
    assert_eq!(ids(&result), vec![3, 2]);
    assert_eq!(result.total, Some(4));
  }

  #[test]
  fn test_sort_reads_unprojected_fields() {
    let source = InMemorySource::new(people());
    let mut q = query();
    q.projection = ["name".to_string()].into_iter().collect();
    q.sort = vec![sort(SortKey::asc("age"), FieldType::Integer)];
    let result = source.run(&q).unwrap();
    let names: Vec<&str> = result
      .items
      .iter()
      .filter_map(|r| r.get("name").and_then(Json::as_str))
      .collect();
    assert!(result.items.iter().all(|r| r.get("age").is_none()));
    assert_eq!(names, vec!["Dave", "bob", "Alice", "Carol"]);
  }

  #[test]
  fn test_expand_has_many() {
    let posts: Vec<Record> = vec![
      json!({"id": 10, "author_id": 1}),
      json!({"id": 11, "author_id": 1}),
      json!({"id": 12, "author_id": 2}),
    ]
    .into_iter()
    .filter_map(Record::from_json)
    .collect();
    let source = InMemorySource::new(people()).with_relation("posts", posts);

    let mut q = query();
    q.predicates = vec![predicate("id", FilterOp::In, Value::List(vec![Value::Int(1), Value::Int(3)]))];
    q.expansions = vec![Expansion {
      name: "posts".to_string(),
      relation: RelationDef::has_many("id", "author_id"),
    }];
    let result = source.run(&q).unwrap();
    assert_eq!(result.items[0].relations["posts"].len(), 2);
    assert!(result.items[1].relations["posts"].is_empty());
  }

  #[test]
  fn test_expand_belongs_to() {
    let source = InMemorySource::new(people()).with_relation("team", teams());
    let mut q = query();
    q.expansions = vec![Expansion {
      name: "team".to_string(),
      relation: RelationDef::belongs_to("team_id", "id"),
    }];
    let result = source.run(&q).unwrap();
    assert_eq!(
      result.items[0].relations["team"][0].get("title"),
      Some(&json!("Core"))
    );
    // Carol has no team; a null reference is simply empty
    assert!(result.items[2].relations["team"].is_empty());
  }

  #[test]
  fn test_dangling_belongs_to_is_not_found() {
    let source = InMemorySource::new(people()).with_relation("team", teams()[..1].to_vec());
    let mut q = query();
    q.expansions = vec![Expansion {
      name: "team".to_string(),
      relation: RelationDef::belongs_to("team_id", "id"),
    }];
    assert!(matches!(source.run(&q), Err(SourceError::NotFound(_))));
  }

  #[test]
  fn test_without_total() {
    let source = InMemorySource::new(people()).without_total();
    assert_eq!(source.run(&query()).unwrap().total, None);
  }
}
