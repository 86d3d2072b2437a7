//! The storage contract and its SQLite backend.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CachedCollection, CachedEntity, Cacheable, QueryKey};

/// Trait for cache storage backends.
///
/// Implementations must be safe to share across worker threads. Single-entity
/// writes use replace-on-conflict semantics keyed by `(entity_type, cache_key)`.
pub trait CacheStorage: Send + Sync {
  /// Get a single entity by key.
  fn get_entity<T: Cacheable>(&self, entity_key: &str) -> Result<Option<CachedEntity<T>>>;

  /// Store a single entity, replacing any previous version.
  fn store_entity<T: Cacheable>(&self, entity: &T) -> Result<()>;

  /// Store several entities in one transaction.
  fn store_entities<T: Cacheable>(&self, entities: &[T]) -> Result<()>;

  /// Store `related`, then `entity`, as one write: either all of them land
  /// or none do.
  fn store_entity_with<T: Cacheable, M: Cacheable>(&self, entity: &T, related: &[M]) -> Result<()>;

  /// Delete a single entity. Returns whether a row was removed.
  fn delete_entity<T: Cacheable>(&self, entity_key: &str) -> Result<bool>;

  /// Delete every entity of type `T` along with the collections that list them.
  fn delete_all<T: Cacheable>(&self) -> Result<usize>;

  /// Get the ordered members of a cached collection.
  fn get_collection<T: Cacheable>(&self, key: &dyn QueryKey)
    -> Result<Option<CachedCollection<T>>>;

  /// Replace a collection: previous membership is discarded, the given
  /// entities become the full member list in the given order.
  fn replace_collection<T: Cacheable>(&self, key: &dyn QueryKey, entities: &[T]) -> Result<()>;

  /// Merge entities into a collection (upsert by key). Existing members keep
  /// their position; unknown members are appended.
  fn merge_collection<T: Cacheable>(&self, key: &dyn QueryKey, entities: &[T]) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at its default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory {}: {}", parent.display(), e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// $XDG_DATA_HOME/folio/cache.db, falling back to ~/.local/share.
  pub fn default_path() -> Result<PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
      .map(|dir| dir.join("folio").join("cache.db"))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Bring the schema up to `SCHEMA_VERSION`, tracked in `PRAGMA user_version`.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;
    if version >= SCHEMA_VERSION {
      return Ok(());
    }

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to create cache schema: {}", e))?;
    conn
      .pragma_update(None, "user_version", SCHEMA_VERSION)
      .map_err(|e| eyre!("Failed to record schema version: {}", e))?;

    Ok(())
  }
}

const SCHEMA_VERSION: i64 = 1;

// Timestamps are RFC 3339 strings written by the application.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    payload BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (kind, key)
);

CREATE TABLE IF NOT EXISTS collections (
    hash TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    kind TEXT NOT NULL,
    member_count INTEGER NOT NULL,
    stored_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS collection_members (
    hash TEXT NOT NULL,
    key TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (hash, key)
);

CREATE INDEX IF NOT EXISTS collection_members_by_position ON collection_members(hash, position);
"#;

fn now() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Invalid timestamp '{}' in cache: {}", s, e))
}

fn upsert_entity<T: Cacheable>(conn: &Connection, entity: &T, stored_at: &str) -> Result<()> {
  let payload =
    serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize {}: {}", T::entity_type(), e))?;

  conn
    .execute(
      "INSERT INTO entities (kind, key, payload, stored_at) VALUES (?1, ?2, ?3, ?4)
       ON CONFLICT (kind, key) DO UPDATE SET payload = excluded.payload, stored_at = excluded.stored_at",
      params![T::entity_type(), entity.cache_key(), payload, stored_at],
    )
    .map_err(|e| eyre!("Failed to write {} {}: {}", T::entity_type(), entity.cache_key(), e))?;

  Ok(())
}

fn decode<T: Cacheable>(payload: &[u8]) -> Result<T> {
  serde_json::from_slice(payload).map_err(|e| eyre!("Corrupt {} in cache: {}", T::entity_type(), e))
}

/// Members of collection `hash` in position order. Members whose entity
/// row is gone are skipped.
fn read_members<T: Cacheable>(conn: &Connection, hash: &str) -> Result<Vec<T>> {
  let mut stmt = conn
    .prepare_cached(
      "SELECT e.payload FROM collection_members m
       JOIN entities e ON e.kind = ?1 AND e.key = m.key
       WHERE m.hash = ?2
       ORDER BY m.position",
    )
    .map_err(|e| eyre!("Failed to prepare member query: {}", e))?;

  let payloads = stmt
    .query_map(params![T::entity_type(), hash], |row| row.get::<_, Vec<u8>>(0))
    .map_err(|e| eyre!("Failed to read collection members: {}", e))?;

  let mut members = Vec::new();
  for payload in payloads {
    let payload = payload.map_err(|e| eyre!("Failed to read collection member: {}", e))?;
    members.push(decode(&payload)?);
  }
  Ok(members)
}

/// Make `entities` the complete membership of `key`, upserting each entity.
fn write_members<T: Cacheable>(conn: &Connection, key: &dyn QueryKey, entities: &[T]) -> Result<()> {
  let hash = key.cache_hash();
  let stored_at = now();

  conn
    .execute("DELETE FROM collection_members WHERE hash = ?1", params![hash])
    .map_err(|e| eyre!("Failed to clear {}: {}", key.description(), e))?;

  conn
    .execute(
      "INSERT INTO collections (hash, description, kind, member_count, stored_at)
       VALUES (?1, ?2, ?3, ?4, ?5)
       ON CONFLICT (hash) DO UPDATE SET description = excluded.description, kind = excluded.kind,
         member_count = excluded.member_count, stored_at = excluded.stored_at",
      params![hash, key.description(), T::entity_type(), entities.len(), stored_at],
    )
    .map_err(|e| eyre!("Failed to record {}: {}", key.description(), e))?;

  let mut insert = conn
    .prepare_cached("INSERT OR REPLACE INTO collection_members (hash, key, position) VALUES (?1, ?2, ?3)")
    .map_err(|e| eyre!("Failed to prepare member insert: {}", e))?;

  for (position, entity) in entities.iter().enumerate() {
    upsert_entity(conn, entity, &stored_at)?;
    insert
      .execute(params![hash, entity.cache_key(), position])
      .map_err(|e| eyre!("Failed to add member to {}: {}", key.description(), e))?;
  }

  Ok(())
}

fn begin(conn: &mut Connection) -> Result<Transaction<'_>> {
  conn
    .transaction()
    .map_err(|e| eyre!("Failed to begin cache transaction: {}", e))
}

fn commit(tx: Transaction<'_>) -> Result<()> {
  tx
    .commit()
    .map_err(|e| eyre!("Failed to commit cache transaction: {}", e))
}

impl CacheStorage for SqliteStorage {
  fn get_entity<T: Cacheable>(&self, entity_key: &str) -> Result<Option<CachedEntity<T>>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT payload, stored_at FROM entities WHERE kind = ?1 AND key = ?2",
        params![T::entity_type(), entity_key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} {}: {}", T::entity_type(), entity_key, e))?;

    row
      .map(|(payload, stored_at)| -> Result<CachedEntity<T>> {
        Ok(CachedEntity {
          entity: decode(&payload)?,
          cached_at: parse_timestamp(&stored_at)?,
        })
      })
      .transpose()
  }

  fn store_entity<T: Cacheable>(&self, entity: &T) -> Result<()> {
    let conn = self.lock()?;
    upsert_entity(&conn, entity, &now())
  }

  fn store_entities<T: Cacheable>(&self, entities: &[T]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = begin(&mut conn)?;
    let stored_at = now();
    for entity in entities {
      upsert_entity(&tx, entity, &stored_at)?;
    }
    commit(tx)
  }

  fn store_entity_with<T: Cacheable, M: Cacheable>(&self, entity: &T, related: &[M]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = begin(&mut conn)?;
    let stored_at = now();
    for member in related {
      upsert_entity(&tx, member, &stored_at)?;
    }
    upsert_entity(&tx, entity, &stored_at)?;
    commit(tx)
  }

  fn delete_entity<T: Cacheable>(&self, entity_key: &str) -> Result<bool> {
    let conn = self.lock()?;

    let removed = conn
      .execute(
        "DELETE FROM entities WHERE kind = ?1 AND key = ?2",
        params![T::entity_type(), entity_key],
      )
      .map_err(|e| eyre!("Failed to delete {} {}: {}", T::entity_type(), entity_key, e))?;

    Ok(removed > 0)
  }

  fn delete_all<T: Cacheable>(&self) -> Result<usize> {
    let mut conn = self.lock()?;
    let kind = T::entity_type();
    let tx = begin(&mut conn)?;

    tx.execute(
      "DELETE FROM collection_members WHERE hash IN (SELECT hash FROM collections WHERE kind = ?1)",
      params![kind],
    )
    .map_err(|e| eyre!("Failed to clear {} collections: {}", kind, e))?;
    tx.execute("DELETE FROM collections WHERE kind = ?1", params![kind])
      .map_err(|e| eyre!("Failed to drop {} collections: {}", kind, e))?;
    let removed = tx
      .execute("DELETE FROM entities WHERE kind = ?1", params![kind])
      .map_err(|e| eyre!("Failed to delete {} entities: {}", kind, e))?;

    commit(tx)?;
    Ok(removed)
  }

  fn get_collection<T: Cacheable>(
    &self,
    key: &dyn QueryKey,
  ) -> Result<Option<CachedCollection<T>>> {
    let conn = self.lock()?;
    let hash = key.cache_hash();

    let stored_at: Option<String> = conn
      .query_row(
        "SELECT stored_at FROM collections WHERE hash = ?1 AND kind = ?2",
        params![hash, T::entity_type()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key.description(), e))?;

    let cached_at = match stored_at {
      Some(s) => parse_timestamp(&s)?,
      None => return Ok(None),
    };

    Ok(Some(CachedCollection {
      entities: read_members(&conn, &hash)?,
      cached_at,
    }))
  }

  fn replace_collection<T: Cacheable>(&self, key: &dyn QueryKey, entities: &[T]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = begin(&mut conn)?;
    write_members(&tx, key, entities)?;
    commit(tx)
  }

  fn merge_collection<T: Cacheable>(&self, key: &dyn QueryKey, new_entities: &[T]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = begin(&mut conn)?;

    let mut merged: Vec<T> = read_members(&tx, &key.cache_hash())?;
    let mut positions: HashMap<String, usize> = merged
      .iter()
      .enumerate()
      .map(|(i, e)| (e.cache_key(), i))
      .collect();

    for entity in new_entities {
      match positions.get(&entity.cache_key()) {
        Some(&i) => merged[i] = entity.clone(),
        None => {
          positions.insert(entity.cache_key(), merged.len());
          merged.push(entity.clone());
        }
      }
    }

    write_members(&tx, key, &merged)?;
    commit(tx)
  }
}
