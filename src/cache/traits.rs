//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// Trait for entities that can be cached.
///
/// Implementors must provide a unique cache key; the key is unique within
/// `entity_type()`, not across all entity types.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this entity (e.g., book id, "book:chapter")
  fn cache_key(&self) -> String;

  /// Entity type name for storage organization (e.g., "book", "chapter")
  fn entity_type() -> &'static str;
}

/// Key addressing an ordered collection of cached entities.
pub trait QueryKey {
  /// Stable, fixed-length hash used as the storage key.
  fn cache_hash(&self) -> String;

  /// Human readable description, stored alongside the collection.
  fn description(&self) -> String;
}

/// SHA256 hex digest of a normalized query description.
pub fn hash_query(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// A single cached entity.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  /// The cached entity
  pub entity: T,
  /// When the entity was cached
  pub cached_at: DateTime<Utc>,
}

/// Result of a cached collection lookup.
#[derive(Debug, Clone)]
pub struct CachedCollection<T> {
  /// The cached entities in order
  pub entities: Vec<T>,
  /// When the collection was last written
  pub cached_at: DateTime<Utc>,
}

impl<T> CachedCollection<T> {
  /// View the collection as one cached value.
  pub fn into_entity(self) -> CachedEntity<Vec<T>> {
    CachedEntity {
      entity: self.entities,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where a delivered value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Fresh data from network, re-read from the cache after write-back
  Network,
  /// Data from cache, no refresh requested
  CacheFresh,
  /// Data from cache while a refresh is in flight
  CacheStale,
  /// Network unavailable or refused, serving cached data
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hash_query_is_stable_hex() {
    let a = hash_query("books:all");
    let b = hash_query("books:all");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert_ne!(a, hash_query("chapters:1"));
  }
}
