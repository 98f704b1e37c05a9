//! Generation store backends: SQLite and a no-op fallback.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::traits::{GenerationRecord, GenerationState, GenerationStore};
use crate::fetch::{RequestSignature, ResponseSnapshot};

/// Schema for the generation store.
const CACHE_SCHEMA: &str = r#"
-- Named, versioned cache generations
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- (signature -> snapshot) entries, scoped to a generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    signature TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (generation, signature),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation
    ON cache_entries(generation);
"#;

/// SQLite-backed generation store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at `<data_dir>/cache.db`.
  pub fn open(data_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(data_dir)
      .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    let path = data_dir.join("cache.db");

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory store, used by tests.
  #[allow(dead_code)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl GenerationStore for SqliteStore {
  fn get_active(&self, signature: &RequestSignature) -> Result<Option<ResponseSnapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT e.status, e.headers, e.body, e.stored_at FROM cache_entries e
         INNER JOIN generations g ON g.name = e.generation
         WHERE g.state = 'active' AND e.signature = ?",
      )
      .map_err(|e| eyre!("Failed to prepare entry lookup: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![signature.as_str()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(ResponseSnapshot {
          status,
          headers,
          body,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_active(&self, signature: &RequestSignature, snapshot: &ResponseSnapshot) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&snapshot.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    // Single statement keyed on the active generation: the write lands in
    // whichever generation is active at commit time, or nowhere at all.
    let inserted = conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (generation, signature, status, headers, body, stored_at)
         SELECT name, ?, ?, ?, ?, ? FROM generations WHERE state = 'active'",
        params![
          signature.as_str(),
          snapshot.status,
          headers,
          snapshot.body,
          snapshot.stored_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(inserted > 0)
  }

  fn active_generation(&self) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations WHERE state = 'active'")
      .map_err(|e| eyre!("Failed to prepare active lookup: {}", e))?;

    let name: Option<String> = stmt.query_row([], |row| row.get(0)).ok();
    Ok(name)
  }

  fn commit_precache(
    &self,
    name: &str,
    entries: &[(RequestSignature, ResponseSnapshot)],
  ) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO generations (name, state, created_at) VALUES (?, ?, ?)",
      params![
        name,
        GenerationState::Installed.as_str(),
        Utc::now().to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", name, e))?;

    for (signature, snapshot) in entries {
      let headers = serde_json::to_string(&snapshot.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries (generation, signature, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          name,
          signature.as_str(),
          snapshot.status,
          headers,
          snapshot.body,
          snapshot.stored_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store precache entry: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit precache for {}: {}", name, e))?;

    Ok(())
  }

  fn activate(&self, name: &str) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation != ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete superseded entries: {}", e))?;

    tx.execute("DELETE FROM generations WHERE name != ?", params![name])
      .map_err(|e| eyre!("Failed to delete superseded generations: {}", e))?;

    let updated = tx
      .execute(
        "UPDATE generations SET state = 'active' WHERE name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to mark generation active: {}", e))?;

    if updated == 0 {
      return Err(eyre!("Cannot activate unknown generation: {}", name));
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit activation of {}: {}", name, e))?;

    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<GenerationRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name, state, created_at FROM generations ORDER BY created_at")
      .map_err(|e| eyre!("Failed to prepare generation listing: {}", e))?;

    let rows: Vec<(String, String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (name, state, created_at) in rows {
      let state = GenerationState::parse(&state)
        .ok_or_else(|| eyre!("Unknown generation state '{}' for {}", state, name))?;
      records.push(GenerationRecord {
        name,
        state,
        created_at: parse_datetime(&created_at)?,
      });
    }

    Ok(records)
  }

  fn entry_count(&self, name: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", name, e))?;

    Ok(count as usize)
  }
}

/// Store implementation that doesn't cache anything.
/// Every lookup misses and every write is discarded; the engine degrades to
/// pass-through network behavior on top of it.
pub struct NoopStore;

impl GenerationStore for NoopStore {
  fn get_active(&self, _signature: &RequestSignature) -> Result<Option<ResponseSnapshot>> {
    Ok(None)
  }

  fn put_active(&self, _signature: &RequestSignature, _snapshot: &ResponseSnapshot) -> Result<bool> {
    Ok(false)
  }

  fn active_generation(&self) -> Result<Option<String>> {
    Ok(None)
  }

  fn commit_precache(
    &self,
    _name: &str,
    _entries: &[(RequestSignature, ResponseSnapshot)],
  ) -> Result<()> {
    Ok(())
  }

  fn activate(&self, _name: &str) -> Result<()> {
    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<GenerationRecord>> {
    Ok(Vec::new())
  }

  fn entry_count(&self, _name: &str) -> Result<usize> {
    Ok(0)
  }
}

/// Parse an RFC 3339 datetime string from storage.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
