//! Generic entity cache backing the resolution pipeline.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Caches entities by type + key as serialized JSON
//! - Tracks ordered collections with replace or merge (upsert) semantics
//! - Reports when each value was cached so callers can present stale data

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStorage;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{hash_query, CacheSource, CachedCollection, CachedEntity, Cacheable, QueryKey};
