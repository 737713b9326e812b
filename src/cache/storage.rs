//! Versioned store implementations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::StoreError;
use crate::net::{RequestIdentity, ResponseSnapshot, ResponseType};

use super::traits::{Namespace, NamespaceInfo, VersionedStore};

/// Store that doesn't persist anything.
/// Used when caching is disabled - every lookup misses and writes are discarded.
pub struct NoopStorage;

impl VersionedStore for NoopStorage {
  fn open(&self, name: &str) -> Result<Namespace, StoreError> {
    Namespace::new(name)
  }

  fn get(
    &self,
    _namespace: &Namespace,
    _identity: &RequestIdentity,
  ) -> Result<Option<ResponseSnapshot>, StoreError> {
    Ok(None) // Always miss
  }

  fn put(
    &self,
    _namespace: &Namespace,
    _identity: &RequestIdentity,
    _snapshot: &ResponseSnapshot,
  ) -> Result<(), StoreError> {
    Ok(()) // Discard
  }

  fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, StoreError> {
    Ok(Vec::new())
  }

  fn delete(&self, _namespace: &Namespace) -> Result<bool, StoreError> {
    Ok(false)
  }
}

/// SQLite-based versioned store.
///
/// The connection sits behind a mutex, so every statement is atomic with
/// respect to concurrent requests and the last write to a key wins.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) a store at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(path)?;
    debug!(path = %path.display(), "opened store");
    Self::with_connection(conn)
  }

  /// A throwaway store that lives as long as this value.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    self.lock()?.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

/// Schema for store tables.
const STORE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Every namespace ever opened and not yet deleted
CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT PRIMARY KEY,
    opened_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request URL digest
CREATE TABLE IF NOT EXISTS snapshots (
    namespace TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    PRIMARY KEY (namespace, key_hash),
    FOREIGN KEY (namespace) REFERENCES namespaces(name) ON DELETE CASCADE
);
"#;

/// SHA256 of the identity's URL for stable, fixed-length keys.
fn key_hash(identity: &RequestIdentity) -> String {
  let mut hasher = Sha256::new();
  hasher.update(identity.cache_key().as_bytes());
  hex::encode(hasher.finalize())
}

fn namespace_exists(conn: &Connection, namespace: &Namespace) -> Result<bool, StoreError> {
  let found: Option<i64> = conn
    .query_row(
      "SELECT 1 FROM namespaces WHERE name = ?",
      params![namespace.as_str()],
      |row| row.get(0),
    )
    .optional()?;
  Ok(found.is_some())
}

fn insert_snapshot(
  conn: &Connection,
  namespace: &Namespace,
  identity: &RequestIdentity,
  snapshot: &ResponseSnapshot,
) -> Result<(), StoreError> {
  let headers = serde_json::to_string(&snapshot.headers)?;
  conn.execute(
    "INSERT OR REPLACE INTO snapshots (namespace, key_hash, url, status, response_type, headers, body)
     VALUES (?, ?, ?, ?, ?, ?, ?)",
    params![
      namespace.as_str(),
      key_hash(identity),
      identity.cache_key(),
      snapshot.status,
      snapshot.response_type.as_str(),
      headers,
      &snapshot.body[..],
    ],
  )?;
  Ok(())
}

impl VersionedStore for SqliteStorage {
  fn open(&self, name: &str) -> Result<Namespace, StoreError> {
    let namespace = Namespace::new(name)?;
    self.lock()?.execute(
      "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
      params![namespace.as_str()],
    )?;
    Ok(namespace)
  }

  fn get(
    &self,
    namespace: &Namespace,
    identity: &RequestIdentity,
  ) -> Result<Option<ResponseSnapshot>, StoreError> {
    let conn = self.lock()?;

    let row: Option<(u16, String, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, response_type, headers, body FROM snapshots
         WHERE namespace = ? AND key_hash = ?",
        params![namespace.as_str(), key_hash(identity)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, response_type, headers, body)) => Ok(Some(ResponseSnapshot {
        status,
        response_type: ResponseType::parse(&response_type).unwrap_or(ResponseType::Opaque),
        headers: serde_json::from_str(&headers)?,
        body: body.into(),
      })),
      None => Ok(None),
    }
  }

  fn put(
    &self,
    namespace: &Namespace,
    identity: &RequestIdentity,
    snapshot: &ResponseSnapshot,
  ) -> Result<(), StoreError> {
    let conn = self.lock()?;
    if !namespace_exists(&conn, namespace)? {
      return Err(StoreError::UnknownNamespace(namespace.to_string()));
    }
    insert_snapshot(&conn, namespace, identity, snapshot)
  }

  fn put_all(
    &self,
    namespace: &Namespace,
    entries: &[(RequestIdentity, ResponseSnapshot)],
  ) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    if !namespace_exists(&tx, namespace)? {
      return Err(StoreError::UnknownNamespace(namespace.to_string()));
    }
    for (identity, snapshot) in entries {
      insert_snapshot(&tx, namespace, identity, snapshot)?;
    }
    tx.commit()?;
    Ok(())
  }

  fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, StoreError> {
    let conn = self.lock()?;
    query_namespaces(&conn)
  }

  fn delete(&self, namespace: &Namespace) -> Result<bool, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM snapshots WHERE namespace = ?",
      params![namespace.as_str()],
    )?;
    let removed = tx.execute(
      "DELETE FROM namespaces WHERE name = ?",
      params![namespace.as_str()],
    )?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn retain_only(&self, keep: &Namespace) -> Result<Vec<NamespaceInfo>, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let removed: Vec<NamespaceInfo> = query_namespaces(&tx)?
      .into_iter()
      .filter(|info| &info.namespace != keep)
      .collect();
    tx.execute(
      "DELETE FROM snapshots WHERE namespace != ?",
      params![keep.as_str()],
    )?;
    tx.execute("DELETE FROM namespaces WHERE name != ?", params![keep.as_str()])?;
    tx.commit()?;
    Ok(removed)
  }
}

fn query_namespaces(conn: &Connection) -> Result<Vec<NamespaceInfo>, StoreError> {
  let mut stmt = conn.prepare(
    "SELECT n.name, n.opened_at, COUNT(s.key_hash) FROM namespaces n
     LEFT JOIN snapshots s ON s.namespace = n.name
     GROUP BY n.name
     ORDER BY n.name",
  )?;

  let rows: Vec<(String, String, i64)> = stmt
    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
    .collect::<Result<_, _>>()?;

  rows
    .into_iter()
    .map(|(name, opened_at, entries)| -> Result<NamespaceInfo, StoreError> {
      Ok(NamespaceInfo {
        namespace: Namespace::new(name)?,
        opened_at: parse_datetime(&opened_at),
        entries: entries.max(0) as u64,
      })
    })
    .collect()
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> DateTime<Utc> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .unwrap_or_default()
}
