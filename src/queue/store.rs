//! Durable mutation queue, SQLite-backed.
//!
//! Entries survive process restarts and are owned exclusively by this store:
//! the capture hook appends, the sync coordinator reads and deletes, nothing
//! mutates an entry in place. Ids come from `AUTOINCREMENT`, so insertion
//! order and id order agree and replay is strictly FIFO.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::fetch::FetchRequest;

/// Schema for the mutation queue.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS mutation_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL
);
"#;

/// A captured mutation awaiting replay.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
  pub id: i64,
  pub url: String,
  pub method: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
  /// Reconstruct the exact request for replay: same method, header set and
  /// body, directed at the same URL.
  pub fn to_request(&self) -> FetchRequest {
    FetchRequest {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }
}

/// SQLite-backed FIFO queue of captured mutations.
pub struct MutationQueue {
  conn: Mutex<Connection>,
}

impl MutationQueue {
  /// Open or create the queue at `<data_dir>/queue.db`.
  pub fn open(data_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(data_dir)
      .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    let path = data_dir.join("queue.db");

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  /// In-memory queue, used by tests.
  #[allow(dead_code)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }

  /// Append a captured request, preserving it verbatim. Returns the entry
  /// with its assigned monotonic id.
  pub fn push(&self, request: &FetchRequest) -> Result<QueueEntry> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let enqueued_at = Utc::now();

    conn
      .execute(
        "INSERT INTO mutation_queue (url, method, headers, body, enqueued_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          request.url,
          request.method,
          headers,
          request.body,
          enqueued_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    Ok(QueueEntry {
      id: conn.last_insert_rowid(),
      url: request.url.clone(),
      method: request.method.clone(),
      headers: request.headers.clone(),
      body: request.body.clone(),
      enqueued_at,
    })
  }

  /// All pending entries in insertion order, oldest id first.
  pub fn oldest_first(&self) -> Result<Vec<QueueEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, enqueued_at
         FROM mutation_queue ORDER BY id ASC",
      )
      .map_err(|e| eyre!("Failed to prepare queue listing: {}", e))?;

    let rows: Vec<(i64, String, String, String, Option<Vec<u8>>, String)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list queue entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut entries = Vec::with_capacity(rows.len());
    for (id, url, method, headers, body, enqueued_at) in rows {
      let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to deserialize headers of entry {}: {}", id, e))?;
      let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| eyre!("Failed to parse enqueued_at of entry {}: {}", id, e))?;
      entries.push(QueueEntry {
        id,
        url,
        method,
        headers,
        body,
        enqueued_at,
      });
    }

    Ok(entries)
  }

  /// Remove a replayed entry.
  pub fn delete(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM mutation_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete queue entry {}: {}", id, e))?;

    Ok(())
  }

  /// Number of pending entries.
  pub fn len(&self) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM mutation_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue entries: {}", e))?;

    Ok(count as usize)
  }
}
