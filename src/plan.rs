//! Query planning and execution.
//!
//! A plan is always built in the same order: filter, project, expand, sort,
//! paginate. Sorting strictly precedes pagination so page boundaries are
//! stable against an unchanged source. The whole plan goes to the data
//! source in a single round trip.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::page::{assemble, ResultPage};
use crate::query::QuerySpec;
use crate::schema::{FieldType, ResourceSchema};
use crate::source::{DataSource, Expansion, Predicate, SortField, SourceError, SourceQuery};

#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
  Filter(Vec<Predicate>),
  Project(BTreeSet<String>),
  Expand(Vec<Expansion>),
  Sort(Vec<SortField>),
  Paginate { offset: u64, limit: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
  steps: Vec<PlanStep>,
}

impl QueryPlan {
  /// Resolve `spec` against the schema that validated it.
  pub fn build(schema: &ResourceSchema, spec: &QuerySpec) -> Result<Self, ExecutionError> {
    let predicates = spec
      .filters
      .iter()
      .map(|filter| Predicate {
        field: filter.field.clone(),
        op: filter.op,
        value: filter.value.clone(),
        case_sensitive: schema
          .field_def(&filter.field)
          .map(|def| def.case_sensitive)
          .unwrap_or(false),
      })
      .collect();

    let expansions = spec
      .expand
      .iter()
      .map(|name| {
        schema
          .relation_def(name)
          .map(|relation| Expansion {
            name: name.clone(),
            relation: relation.clone(),
          })
          .ok_or_else(|| {
            ExecutionError::NotFound(format!(
              "relation `{}` on resource `{}`",
              name, schema.name
            ))
          })
      })
      .collect::<Result<Vec<_>, _>>()?;

    let sort = spec
      .sort
      .iter()
      .map(|key| {
        let ty = schema
          .field_def(&key.field)
          .map(|def| def.ty)
          .unwrap_or(FieldType::String);
        SortField::new(key, ty)
      })
      .collect();

    Ok(Self {
      steps: vec![
        PlanStep::Filter(predicates),
        PlanStep::Project(spec.fields.clone()),
        PlanStep::Expand(expansions),
        PlanStep::Sort(sort),
        PlanStep::Paginate {
          offset: spec.offset(),
          limit: u64::from(spec.page_size),
        },
      ],
    })
  }

  pub fn steps(&self) -> &[PlanStep] {
    &self.steps
  }

  /// Flatten the plan into the single request the source receives.
  pub fn to_source_query(&self) -> SourceQuery {
    let mut query = SourceQuery {
      predicates: Vec::new(),
      projection: BTreeSet::new(),
      expansions: Vec::new(),
      sort: Vec::new(),
      offset: 0,
      limit: u64::MAX,
    };
    for step in &self.steps {
      match step {
        PlanStep::Filter(predicates) => query.predicates.extend(predicates.iter().cloned()),
        PlanStep::Project(fields) => query.projection.extend(fields.iter().cloned()),
        PlanStep::Expand(expansions) => query.expansions.extend(expansions.iter().cloned()),
        PlanStep::Sort(keys) => query.sort.extend(keys.iter().cloned()),
        PlanStep::Paginate { offset, limit } => {
          query.offset = *offset;
          query.limit = *limit;
        }
      }
    }
    query
  }
}

/// Run `spec` against `source` and assemble the resulting page.
///
/// Exactly one source call is made. Nothing here retries.
pub async fn execute(
  source: &dyn DataSource,
  schema: &ResourceSchema,
  spec: &QuerySpec,
) -> Result<ResultPage, ExecutionError> {
  let plan = QueryPlan::build(schema, spec)?;
  let query = plan.to_source_query();
  debug!(
    resource = %schema.name,
    predicates = query.predicates.len(),
    expansions = query.expansions.len(),
    offset = query.offset,
    limit = query.limit,
    "executing plan"
  );

  let result = source.query(&query).await.map_err(|err| match err {
    SourceError::Unavailable(msg) => {
      warn!(resource = %schema.name, error = %msg, "data source failed");
      ExecutionError::SourceFailure(msg)
    }
    SourceError::NotFound(msg) => ExecutionError::NotFound(msg),
  })?;

  Ok(assemble(result.items, result.total, spec))
}
