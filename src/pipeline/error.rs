use color_eyre::Report;
use serde::Serialize;
use thiserror::Error;

/// Why a unit of work ended without a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ResolveError {
  /// The work was superseded or cancelled by its owner.
  #[error("cancelled")]
  Cancelled,
  /// Connectivity or I/O failure talking to the server.
  #[error("transport error: {0}")]
  Transport(String),
  /// The server answered with a non-success status.
  #[error("server rejected the request with status {code}")]
  Status { code: u16 },
  /// A precondition failed before any network call was attempted.
  #[error("validation failed: {0}")]
  Validation(String),
  /// The local store failed to read or write.
  #[error("storage error: {0}")]
  Storage(String),
}

impl ResolveError {
  pub fn transport(report: Report) -> Self {
    Self::Transport(format!("{:#}", report))
  }

  pub fn storage(report: Report) -> Self {
    Self::Storage(format!("{:#}", report))
  }

  pub fn validation(reason: impl Into<String>) -> Self {
    Self::Validation(reason.into())
  }

  /// Whether the server explicitly refused the request with `code`.
  pub fn is_rejection(&self, code: u16) -> bool {
    matches!(self, Self::Status { code: c } if *c == code)
  }
}
