//! SQLite implementation of the subject store.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::traits::SubjectStore;
use crate::error::StorageError;
use crate::notes::{CachedSubjectRecord, CachedSubjectSummary, CachedUnit, SubjectMetadata};

/// SQLite-based subject storage.
///
/// A single connection behind a mutex; every write runs in one transaction
/// so readers never see a half-replaced subject.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the store at the default location.
  pub fn open() -> Result<Self, StorageError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    debug!(path = %path.display(), "opening offline store");
    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self, StorageError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        StorageError::from(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "could not determine data directory",
        ))
      })?;

    Ok(data_dir.join("notelab").join("offline.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::Poisoned)
  }
}

/// Schema for the offline store.
const STORE_SCHEMA: &str = r#"
-- One row per downloaded subject
CREATE TABLE IF NOT EXISTS subjects (
    subject_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    metadata BLOB NOT NULL,
    unit_count INTEGER NOT NULL,
    total_bytes INTEGER NOT NULL,
    downloaded_at TEXT NOT NULL
);

-- Unit payloads (position preserves request order)
CREATE TABLE IF NOT EXISTS units (
    subject_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    unit_id TEXT NOT NULL,
    name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    payload BLOB NOT NULL,
    checksum TEXT NOT NULL,
    PRIMARY KEY (subject_id, position)
);
"#;

impl SubjectStore for SqliteStorage {
  fn save(&self, record: &CachedSubjectRecord) -> Result<(), StorageError> {
    let subject_id = record.subject_id();
    let metadata = serde_json::to_vec(&record.subject)?;
    let downloaded_at = record
      .downloaded_at
      .to_rfc3339_opts(SecondsFormat::Nanos, true);

    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    // Replace wholesale: drop old units, then upsert the subject row
    tx.execute("DELETE FROM units WHERE subject_id = ?", params![subject_id])?;
    tx.execute(
      "INSERT OR REPLACE INTO subjects (subject_id, title, metadata, unit_count, total_bytes, downloaded_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        subject_id,
        record.subject.title,
        metadata,
        record.units.len() as i64,
        record.total_bytes() as i64,
        downloaded_at
      ],
    )?;

    {
      let mut stmt = tx.prepare(
        "INSERT INTO units (subject_id, position, unit_id, name, content_type, payload, checksum)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
      )?;
      for (position, unit) in record.units.iter().enumerate() {
        stmt.execute(params![
          subject_id,
          position as i64,
          unit.id,
          unit.name,
          unit.content_type,
          unit.payload,
          checksum(&unit.payload)
        ])?;
      }
    }

    tx.commit()?;
    debug!(
      subject_id,
      units = record.units.len(),
      "stored cached subject"
    );

    Ok(())
  }

  fn get(&self, subject_id: &str) -> Result<Option<CachedSubjectRecord>, StorageError> {
    let mut conn = self.lock()?;
    // Both reads share one snapshot, even with other connections writing
    let tx = conn.transaction()?;

    let row: Option<(Vec<u8>, i64, String)> = tx
      .query_row(
        "SELECT metadata, unit_count, downloaded_at FROM subjects WHERE subject_id = ?",
        params![subject_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()?;

    let (metadata, unit_count, downloaded_at) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    let rows = {
      let mut stmt = tx.prepare(
        "SELECT unit_id, name, content_type, payload, checksum FROM units
         WHERE subject_id = ?
         ORDER BY position",
      )?;
      let rows = stmt
        .query_map(params![subject_id], |row| {
          Ok((
            CachedUnit {
              id: row.get(0)?,
              name: row.get(1)?,
              content_type: row.get(2)?,
              payload: row.get(3)?,
            },
            row.get::<_, String>(4)?,
          ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
      rows
    };
    tx.commit()?;

    let subject: SubjectMetadata = serde_json::from_slice(&metadata)?;
    let downloaded_at = parse_datetime(subject_id, &downloaded_at)?;

    let mut units = Vec::with_capacity(rows.len());
    for (unit, stored_checksum) in rows {
      if checksum(&unit.payload) != stored_checksum {
        return Err(StorageError::Corrupt {
          subject_id: subject_id.to_string(),
          reason: format!("checksum mismatch for unit {}", unit.id),
        });
      }
      units.push(unit);
    }

    if units.len() as i64 != unit_count {
      return Err(StorageError::Corrupt {
        subject_id: subject_id.to_string(),
        reason: format!("expected {} units, found {}", unit_count, units.len()),
      });
    }

    Ok(Some(CachedSubjectRecord {
      subject,
      units,
      downloaded_at,
    }))
  }

  fn exists(&self, subject_id: &str) -> Result<bool, StorageError> {
    let conn = self.lock()?;
    let exists = conn.query_row(
      "SELECT EXISTS(SELECT 1 FROM subjects WHERE subject_id = ?)",
      params![subject_id],
      |row| row.get(0),
    )?;
    Ok(exists)
  }

  fn remove(&self, subject_id: &str) -> Result<bool, StorageError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM units WHERE subject_id = ?", params![subject_id])?;
    let removed = tx.execute(
      "DELETE FROM subjects WHERE subject_id = ?",
      params![subject_id],
    )?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn list(&self) -> Result<Vec<CachedSubjectSummary>, StorageError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT subject_id, title, unit_count, total_bytes, downloaded_at FROM subjects
       ORDER BY downloaded_at DESC, subject_id",
    )?;

    let rows = stmt.query_map([], |row| {
      Ok((
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, i64>(2)?,
        row.get::<_, i64>(3)?,
        row.get::<_, String>(4)?,
      ))
    })?;

    let mut summaries = Vec::new();
    for row in rows {
      let (subject_id, title, unit_count, total_bytes, downloaded_at) = row?;
      let downloaded_at = parse_datetime(&subject_id, &downloaded_at)?;
      summaries.push(CachedSubjectSummary {
        subject_id,
        title,
        unit_count: unit_count as usize,
        total_bytes: total_bytes as u64,
        downloaded_at,
      });
    }

    Ok(summaries)
  }
}

/// SHA256 of a payload, hex encoded.
fn checksum(payload: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(payload);
  hex::encode(hasher.finalize())
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(subject_id: &str, s: &str) -> Result<DateTime<Utc>, StorageError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StorageError::Corrupt {
      subject_id: subject_id.to_string(),
      reason: format!("bad timestamp '{}': {}", s, e),
    })
}
