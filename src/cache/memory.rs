//! Process-lifetime cache storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::storage::CacheStorage;
use super::traits::{CachedCollection, CachedEntity, Cacheable, QueryKey};

#[derive(Default)]
struct Tables {
  /// (entity_type, entity_key) -> (serialized entity, cached_at)
  entities: HashMap<(&'static str, String), (Vec<u8>, DateTime<Utc>)>,
  /// query_hash -> collection membership
  collections: HashMap<String, Collection>,
}

struct Collection {
  entity_type: &'static str,
  keys: Vec<String>,
  cached_at: DateTime<Utc>,
}

fn encode<T: Cacheable>(entity: &T) -> Result<Vec<u8>> {
  serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))
}

impl Tables {
  fn upsert<T: Cacheable>(&mut self, entity: &T) -> Result<()> {
    let data = encode(entity)?;
    self
      .entities
      .insert((T::entity_type(), entity.cache_key()), (data, Utc::now()));
    Ok(())
  }

  fn members<T: Cacheable>(&self, keys: &[String]) -> Result<Vec<T>> {
    keys
      .iter()
      .filter_map(|key| self.entities.get(&(T::entity_type(), key.clone())))
      .map(|(data, _)| {
        serde_json::from_slice(data).map_err(|e| eyre!("Failed to deserialize entity: {}", e))
      })
      .collect()
  }

  fn write_members<T: Cacheable>(&mut self, key: &dyn QueryKey, entities: &[T]) -> Result<()> {
    for entity in entities {
      self.upsert(entity)?;
    }
    self.collections.insert(
      key.cache_hash(),
      Collection {
        entity_type: T::entity_type(),
        keys: entities.iter().map(|e| e.cache_key()).collect(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }
}

/// In-memory storage with the same semantics as `SqliteStorage`.
///
/// Contents live as long as the value; nothing is persisted.
#[derive(Default)]
pub struct MemoryStorage {
  tables: Mutex<Tables>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
    self
      .tables
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn get_entity<T: Cacheable>(&self, entity_key: &str) -> Result<Option<CachedEntity<T>>> {
    let tables = self.lock()?;
    match tables
      .entities
      .get(&(T::entity_type(), entity_key.to_string()))
    {
      Some((data, cached_at)) => {
        let entity = serde_json::from_slice(data)
          .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
        Ok(Some(CachedEntity {
          entity,
          cached_at: *cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn store_entity<T: Cacheable>(&self, entity: &T) -> Result<()> {
    self.lock()?.upsert(entity)
  }

  fn store_entities<T: Cacheable>(&self, entities: &[T]) -> Result<()> {
    let mut tables = self.lock()?;
    for entity in entities {
      tables.upsert(entity)?;
    }
    Ok(())
  }

  fn store_entity_with<T: Cacheable, M: Cacheable>(&self, entity: &T, related: &[M]) -> Result<()> {
    // Encode everything before touching the tables.
    let mut rows = Vec::with_capacity(related.len() + 1);
    for member in related {
      rows.push(((M::entity_type(), member.cache_key()), encode(member)?));
    }
    rows.push(((T::entity_type(), entity.cache_key()), encode(entity)?));

    let mut tables = self.lock()?;
    let stored_at = Utc::now();
    for (key, data) in rows {
      tables.entities.insert(key, (data, stored_at));
    }
    Ok(())
  }

  fn delete_entity<T: Cacheable>(&self, entity_key: &str) -> Result<bool> {
    let mut tables = self.lock()?;
    Ok(
      tables
        .entities
        .remove(&(T::entity_type(), entity_key.to_string()))
        .is_some(),
    )
  }

  fn delete_all<T: Cacheable>(&self) -> Result<usize> {
    let mut tables = self.lock()?;
    let entity_type = T::entity_type();
    tables
      .collections
      .retain(|_, collection| collection.entity_type != entity_type);

    let before = tables.entities.len();
    tables.entities.retain(|(kind, _), _| *kind != entity_type);
    Ok(before - tables.entities.len())
  }

  fn get_collection<T: Cacheable>(
    &self,
    key: &dyn QueryKey,
  ) -> Result<Option<CachedCollection<T>>> {
    let tables = self.lock()?;
    let collection = match tables.collections.get(&key.cache_hash()) {
      Some(c) if c.entity_type == T::entity_type() => c,
      _ => return Ok(None),
    };

    Ok(Some(CachedCollection {
      entities: tables.members(&collection.keys)?,
      cached_at: collection.cached_at,
    }))
  }

  fn replace_collection<T: Cacheable>(&self, key: &dyn QueryKey, entities: &[T]) -> Result<()> {
    self.lock()?.write_members(key, entities)
  }

  fn merge_collection<T: Cacheable>(&self, key: &dyn QueryKey, new_entities: &[T]) -> Result<()> {
    let mut tables = self.lock()?;
    let existing_keys = tables
      .collections
      .get(&key.cache_hash())
      .map(|c| c.keys.clone())
      .unwrap_or_default();
    let mut merged: Vec<T> = tables.members(&existing_keys)?;

    for entity in new_entities {
      let entity_key = entity.cache_key();
      match merged.iter_mut().find(|e| e.cache_key() == entity_key) {
        Some(existing) => *existing = entity.clone(),
        None => merged.push(entity.clone()),
      }
    }

    tables.write_members(key, &merged)
  }
}
