//! Error taxonomy for request parsing and query execution.
//!
//! Client-input problems (`ParseError`) are always reported back and never
//! retried. Execution problems (`ExecutionError`) distinguish a transient
//! source failure from an absent result so the host can map them to the
//! right response.

use serde::Serialize;
use std::time::Duration;

/// The request could not be turned into a valid query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
  #[error("unknown field `{field}`")]
  UnknownField { field: String },
  #[error("value `{value}` for field `{field}` is not a valid {expected}")]
  TypeMismatch {
    field: String,
    expected: &'static str,
    value: String,
  },
  #[error("unknown relation `{relation}`")]
  UnknownRelation { relation: String },
  #[error("malformed `{param}` parameter: {reason}")]
  Malformed { param: String, reason: String },
}

/// Running a valid query against the data source failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
  #[error("data source failure: {0}")]
  SourceFailure(String),
  #[error("not found: {0}")]
  NotFound(String),
  #[error("data source did not answer within {0:?}")]
  Timeout(Duration),
}

/// Anything an endpoint can report to its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error(transparent)]
  Execution(#[from] ExecutionError),
}

/// Coarse classification the host maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// The request itself is wrong; retrying it unchanged will not help.
  BadRequest,
  /// The source failed or timed out; the caller may retry.
  Transient,
  /// Nothing matched a lookup that expected a record.
  NotFound,
}

/// Error half of the response contract, kept apart from the success envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
  pub kind: ErrorKind,
  pub message: String,
}

impl EndpointError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      EndpointError::Parse(_) => ErrorKind::BadRequest,
      EndpointError::Execution(ExecutionError::NotFound(_)) => ErrorKind::NotFound,
      EndpointError::Execution(_) => ErrorKind::Transient,
    }
  }

  pub fn to_response(&self) -> ErrorResponse {
    ErrorResponse {
      kind: self.kind(),
      message: self.to_string(),
    }
  }
}
