//! The update protocol shared by every unit of work.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ResolveError;
use crate::cache::CacheSource;

/// Diagnostic side-channel carried by every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
  /// User-facing status line (e.g. "Refreshing from server")
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  /// Where the carried value came from
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source: Option<CacheSource>,
  /// When the carried value was written to the local store
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cached_at: Option<DateTime<Utc>>,
}

impl Metadata {
  pub fn status(status: impl Into<String>) -> Self {
    Self {
      status: Some(status.into()),
      ..Self::default()
    }
  }

  pub fn with_source(mut self, source: CacheSource) -> Self {
    self.source = Some(source);
    self
  }

  pub fn with_cached_at(mut self, cached_at: Option<DateTime<Utc>>) -> Self {
    self.cached_at = cached_at;
    self
  }
}

/// One step in the lifecycle of a unit of work.
///
/// Per task: `Pending` at most once and first, any number of `InProgress`,
/// then exactly one of `Success` or `Failure`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Update<P, R> {
  Pending {
    metadata: Metadata,
  },
  InProgress {
    values: Vec<P>,
    metadata: Metadata,
  },
  Success {
    result: R,
    metadata: Metadata,
  },
  Failure {
    partial: Option<R>,
    error: ResolveError,
    metadata: Metadata,
  },
}

impl<P, R> Update<P, R> {
  pub fn pending() -> Self {
    Self::Pending {
      metadata: Metadata::default(),
    }
  }

  pub fn progress(value: P, metadata: Metadata) -> Self {
    Self::InProgress {
      values: vec![value],
      metadata,
    }
  }

  pub fn success(result: R, metadata: Metadata) -> Self {
    Self::Success { result, metadata }
  }

  pub fn failure(partial: Option<R>, error: ResolveError, metadata: Metadata) -> Self {
    Self::Failure {
      partial,
      error,
      metadata,
    }
  }

  pub fn cancelled(partial: Option<R>) -> Self {
    Self::failure(partial, ResolveError::Cancelled, Metadata::status("Cancelled"))
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Success { .. } | Self::Failure { .. })
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Self::Success { .. })
  }

  pub fn metadata(&self) -> &Metadata {
    match self {
      Self::Pending { metadata }
      | Self::InProgress { metadata, .. }
      | Self::Success { metadata, .. }
      | Self::Failure { metadata, .. } => metadata,
    }
  }

  pub fn error(&self) -> Option<&ResolveError> {
    match self {
      Self::Failure { error, .. } => Some(error),
      _ => None,
    }
  }

  /// The result of a `Success`, or the partial carried by a `Failure`.
  pub fn value(&self) -> Option<&R> {
    match self {
      Self::Success { result, .. } => Some(result),
      Self::Failure { partial, .. } => partial.as_ref(),
      Self::Pending { .. } | Self::InProgress { .. } => None,
    }
  }

  /// Consume the update, keeping its result or partial value.
  pub fn into_value(self) -> Option<R> {
    match self {
      Self::Success { result, .. } => Some(result),
      Self::Failure { partial, .. } => partial,
      Self::Pending { .. } | Self::InProgress { .. } => None,
    }
  }

  /// Short name used in logs.
  pub fn label(&self) -> &'static str {
    match self {
      Self::Pending { .. } => "pending",
      Self::InProgress { .. } => "in_progress",
      Self::Success { .. } => "success",
      Self::Failure { .. } => "failure",
    }
  }
}

/// Where an update sequence currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
  Fresh,
  Started,
  Finished,
}

impl Phase {
  /// Advance past `update`.
  ///
  /// # Panics
  ///
  /// Panics when `update` would break the ordering of the protocol: a second
  /// terminal, anything after a terminal, or `Pending` after other updates.
  pub(crate) fn advance<P, R>(self, update: &Update<P, R>) -> Phase {
    match (self, update) {
      (Phase::Finished, u) => panic!("update emitted after terminal: {}", u.label()),
      (Phase::Fresh, Update::Pending { .. }) => Phase::Started,
      (Phase::Started, Update::Pending { .. }) => panic!("pending emitted after work started"),
      (_, u) if u.is_terminal() => Phase::Finished,
      _ => Phase::Started,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  type U = Update<u32, u32>;

  #[test]
  fn test_phase_accepts_full_sequence() {
    let sequence: Vec<U> = vec![
      Update::pending(),
      Update::progress(1, Metadata::default()),
      Update::progress(2, Metadata::default()),
      Update::success(3, Metadata::default()),
    ];
    let phase = sequence.iter().fold(Phase::Fresh, |p, u| p.advance(u));
    assert_eq!(phase, Phase::Finished);
  }

  #[test]
  fn test_phase_accepts_failure_without_pending() {
    let update: U = Update::failure(Some(1), ResolveError::Cancelled, Metadata::default());
    assert_eq!(Phase::Fresh.advance(&update), Phase::Finished);
  }

  #[test]
  #[should_panic(expected = "after terminal")]
  fn test_second_terminal_panics() {
    let done: U = Update::success(1, Metadata::default());
    Phase::Fresh.advance(&done).advance(&done);
  }

  #[test]
  #[should_panic(expected = "pending emitted after work started")]
  fn test_late_pending_panics() {
    let progress: U = Update::progress(1, Metadata::default());
    Phase::Fresh.advance(&progress).advance(&U::pending());
  }

  #[test]
  fn test_value_prefers_result_then_partial() {
    let success: U = Update::success(7, Metadata::default());
    let failure: U = Update::failure(
      Some(5),
      ResolveError::Transport("offline".to_string()),
      Metadata::default(),
    );
    let progress: U = Update::progress(1, Metadata::default());

    assert_eq!(success.value(), Some(&7));
    assert_eq!(failure.value(), Some(&5));
    assert_eq!(progress.value(), None);
  }
}
