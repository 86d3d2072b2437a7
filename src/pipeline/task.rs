//! The cache -> fetch -> write-back -> re-read protocol, written once.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::fmt::Debug;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::ResolveError;
use super::transport::{RemoteTransport, Request};
use super::update::{Metadata, Update};
use crate::cache::{CacheSource, CacheStorage, CachedEntity};

/// Outcome of a resolver's pre-flight check.
#[derive(Debug, Clone, PartialEq)]
pub enum Precheck<D> {
  /// Run the normal protocol.
  Proceed,
  /// Answer immediately without touching the store or the network.
  Resolved(D),
  /// Fail immediately with a validation error, without any I/O.
  Rejected(String),
}

/// Entity-specific customization of the resolution protocol.
///
/// A resolver knows how to address its entity in the local store and on the
/// backend, and how to translate between the remote, stored and domain forms.
/// Store policy (upsert vs. collection replace) lives in `write`.
pub trait Resolver: Send + Sync + 'static {
  type Key: Clone + Debug + PartialEq + Send + Sync + 'static;
  /// Storage form, as held by the local store.
  type Stored: Send + 'static;
  /// Domain form, as delivered to subscribers.
  type Domain: Clone + Send + Sync + 'static;

  /// Name used for logs and slot registration.
  const NAME: &'static str;

  fn precheck(&self, _key: &Self::Key) -> Precheck<Self::Domain> {
    Precheck::Proceed
  }

  fn read<S: CacheStorage>(
    &self,
    store: &S,
    key: &Self::Key,
  ) -> Result<Option<CachedEntity<Self::Stored>>>;

  fn write<S: CacheStorage>(&self, store: &S, key: &Self::Key, stored: &Self::Stored) -> Result<()>;

  fn request(&self, key: &Self::Key) -> Request;

  /// Translate a successful response body into storage form.
  fn decode(&self, key: &Self::Key, body: &[u8]) -> Result<Self::Stored>;

  fn to_domain(&self, stored: Self::Stored) -> Self::Domain;
}

/// Updates produced by a resolution.
pub type Resolution<D> = Update<D, D>;

/// Metadata for a failure that may still carry the cached value.
fn fallback_metadata(has_partial: bool, cached_at: Option<DateTime<Utc>>, status: &str) -> Metadata {
  let metadata = Metadata::status(status);
  if has_partial {
    metadata
      .with_source(CacheSource::Offline)
      .with_cached_at(cached_at)
  } else {
    metadata
  }
}

/// One execution of the protocol for one key.
pub struct ResolutionTask<'a, R: Resolver, S, T> {
  pub resolver: &'a R,
  pub store: &'a S,
  pub transport: &'a T,
  pub key: &'a R::Key,
  pub always_fetch: bool,
  pub token: &'a CancellationToken,
}

impl<R, S, T> ResolutionTask<'_, R, S, T>
where
  R: Resolver,
  S: CacheStorage,
  T: RemoteTransport,
{
  /// Execute the protocol, handing intermediate updates to `progress` and
  /// returning the terminal update.
  ///
  /// The token is checked before every blocking step and right after the
  /// network call returns. Once cancelled, nothing further is written or
  /// emitted.
  pub fn run(self, mut progress: impl FnMut(Resolution<R::Domain>)) -> Resolution<R::Domain> {
    let key = self.key;

    match self.resolver.precheck(key) {
      Precheck::Proceed => {}
      Precheck::Resolved(value) => {
        debug!(resolver = R::NAME, ?key, "Resolved without I/O");
        return Update::success(value, Metadata::status("No check required"));
      }
      Precheck::Rejected(reason) => {
        debug!(resolver = R::NAME, ?key, %reason, "Rejected before I/O");
        return Update::failure(
          None,
          ResolveError::validation(reason),
          Metadata::status("Rejected"),
        );
      }
    }

    let cached = match self.resolver.read(self.store, key) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(resolver = R::NAME, ?key, error = %e, "Failed to read local store");
        return Update::failure(None, ResolveError::storage(e), Metadata::status("Cache unavailable"));
      }
    };
    let cached_at = cached.as_ref().map(|c| c.cached_at);
    let candidate = cached.map(|c| self.resolver.to_domain(c.entity));

    if self.token.is_cancelled() {
      return Update::cancelled(candidate);
    }

    let candidate = match candidate {
      Some(value) if !self.always_fetch => {
        debug!(resolver = R::NAME, ?key, "Serving cached value");
        return Update::success(
          value,
          Metadata::status("Loaded from cache")
            .with_source(CacheSource::CacheFresh)
            .with_cached_at(cached_at),
        );
      }
      Some(value) => {
        progress(Update::progress(
          value.clone(),
          Metadata::status("Refreshing from server")
            .with_source(CacheSource::CacheStale)
            .with_cached_at(cached_at),
        ));
        Some(value)
      }
      None => None,
    };

    if self.token.is_cancelled() {
      return Update::cancelled(candidate);
    }

    let request = self.resolver.request(key);
    let response = self.transport.fetch(&request);

    if self.token.is_cancelled() {
      debug!(resolver = R::NAME, ?key, %request, "Discarding response of cancelled task");
      return Update::cancelled(candidate);
    }

    let response = match response {
      Ok(response) => response,
      Err(e) => {
        warn!(resolver = R::NAME, %request, error = %e, "Request failed");
        let metadata = fallback_metadata(candidate.is_some(), cached_at, "Server unreachable");
        return Update::failure(candidate, ResolveError::transport(e), metadata);
      }
    };

    if !response.is_successful() {
      warn!(resolver = R::NAME, %request, status = response.status, "Request rejected");
      let metadata = fallback_metadata(candidate.is_some(), cached_at, "Server rejected the request");
      let error = ResolveError::Status {
        code: response.status,
      };
      return Update::failure(candidate, error, metadata);
    }

    let stored = match self.resolver.decode(key, &response.body) {
      Ok(stored) => stored,
      Err(e) => {
        warn!(resolver = R::NAME, %request, error = %e, "Malformed response");
        let metadata = fallback_metadata(candidate.is_some(), cached_at, "Unexpected server response");
        return Update::failure(candidate, ResolveError::transport(e), metadata);
      }
    };

    if self.token.is_cancelled() {
      return Update::cancelled(candidate);
    }

    if let Err(e) = self.resolver.write(self.store, key, &stored) {
      error!(resolver = R::NAME, ?key, error = %e, "Failed to write back");
      return Update::failure(candidate, ResolveError::storage(e), Metadata::status("Cache write failed"));
    }

    // The store is the source of truth: deliver what it holds now.
    match self.resolver.read(self.store, key) {
      Ok(Some(fresh)) => {
        info!(resolver = R::NAME, ?key, "Refreshed from server");
        Update::success(
          self.resolver.to_domain(fresh.entity),
          Metadata::status("Up to date")
            .with_source(CacheSource::Network)
            .with_cached_at(Some(fresh.cached_at)),
        )
      }
      Ok(None) => {
        error!(resolver = R::NAME, ?key, "Entry missing right after write-back");
        Update::failure(
          candidate,
          ResolveError::Storage("entry missing after write-back".to_string()),
          Metadata::status("Cache write failed"),
        )
      }
      Err(e) => {
        error!(resolver = R::NAME, ?key, error = %e, "Failed to re-read after write-back");
        Update::failure(candidate, ResolveError::storage(e), Metadata::status("Cache read failed"))
      }
    }
  }
}
