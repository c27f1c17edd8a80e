//! Pagination assembly and the response envelope.

use serde::{Deserialize, Serialize};

use crate::query::QuerySpec;
use crate::source::Record;

/// One page of results. Built fresh per execution and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
  pub items: Vec<Record>,
  pub page_number: u32,
  pub page_size: u32,
  /// Present only when the source could count cheaply
  pub total_count: Option<u64>,
  pub has_next: bool,
}

/// Build the page for `spec` from what the source returned.
///
/// With a total count, `has_next` is exact. Without one it is true whenever
/// the page came back full, which over-reports on an exactly-full last page.
pub fn assemble(mut items: Vec<Record>, total: Option<u64>, spec: &QuerySpec) -> ResultPage {
  items.truncate(spec.page_size as usize);

  let has_next = match total {
    Some(total) => total > u64::from(spec.page) * u64::from(spec.page_size),
    None => items.len() == spec.page_size as usize,
  };

  ResultPage {
    items,
    page_number: spec.page,
    page_size: spec.page_size,
    total_count: total,
    has_next,
  }
}

/// Success half of the response contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
  pub data: Vec<serde_json::Value>,
  pub page: u32,
  pub page_size: u32,
  pub has_next: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub total_count: Option<u64>,
}

impl From<&ResultPage> for Envelope {
  fn from(page: &ResultPage) -> Self {
    Self {
      data: page.items.iter().map(Record::to_json).collect(),
      page: page.page_number,
      page_size: page.page_size,
      has_next: page.has_next,
      total_count: page.total_count,
    }
  }
}
