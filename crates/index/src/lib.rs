//! Persistent transfer index.
//!
//! A small SQLite store keyed by content hash that records every file the
//! engine has materialized locally, plus the last-sync timestamp. The
//! index is advisory for deduplication: a hit means "probably already at
//! `local_path`" and callers cross-check the filesystem before skipping.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error};

/// Errors produced by the index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One row of the index, keyed by the 64-hex SHA-256 of the file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub hash: String,
    pub device_path: String,
    pub local_path: String,
    /// Wall-clock second the transfer finished.
    pub transfer_ts: u64,
    pub size: u64,
    pub mtime: u64,
}

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT UNIQUE NOT NULL,
    device_path TEXT NOT NULL,
    local_path TEXT NOT NULL,
    transfer_ts INTEGER NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_photos_hash ON photos(hash);
CREATE INDEX IF NOT EXISTS idx_photos_mtime ON photos(mtime);
CREATE INDEX IF NOT EXISTS idx_photos_transfer_ts ON photos(transfer_ts);

CREATE TABLE IF NOT EXISTS sync_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR IGNORE INTO sync_metadata (key, value) VALUES ('last_sync_time', '0');
";

/// Durable hash → metadata store.
///
/// The connection is wrapped in a mutex so the handle is `Sync` and all
/// access from one process is serialized. Cross-process access is not
/// supported. SQLite's busy timeout covers transient lock contention for
/// up to five seconds before an operation reports an error.
pub struct PhotoIndex {
    conn: Mutex<Connection>,
}

impl PhotoIndex {
    /// Opens or creates the store at `path`, creating any missing tables.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "index opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("index mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    /// Returns `true` if a record with this content hash exists.
    pub fn contains(&self, hash: &str) -> Result<bool, IndexError> {
        let conn = self.conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM photos WHERE hash = ?1", [hash], |row| {
                row.get(0)
            })?;
        Ok(count > 0)
    }

    /// Local path recorded for this hash, if any.
    pub fn local_path_of(&self, hash: &str) -> Result<Option<String>, IndexError> {
        let conn = self.conn();
        let path = conn
            .query_row(
                "SELECT local_path FROM photos WHERE hash = ?1 LIMIT 1",
                [hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(path)
    }

    /// Full record for this hash, if any.
    pub fn record(&self, hash: &str) -> Result<Option<IndexRecord>, IndexError> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT hash, device_path, local_path, transfer_ts, size, mtime
                 FROM photos WHERE hash = ?1 LIMIT 1",
                [hash],
                |row| {
                    Ok(IndexRecord {
                        hash: row.get(0)?,
                        device_path: row.get(1)?,
                        local_path: row.get(2)?,
                        transfer_ts: row.get::<_, i64>(3)? as u64,
                        size: row.get::<_, i64>(4)? as u64,
                        mtime: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Records a transferred file. Idempotent upsert on `hash`; sets
    /// `transfer_ts` to the current wall-clock second.
    pub fn insert(
        &self,
        hash: &str,
        device_path: &str,
        local_path: &str,
        size: u64,
        mtime: u64,
    ) -> Result<(), IndexError> {
        let transfer_ts = now_secs();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO photos (hash, device_path, local_path, transfer_ts, size, mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(hash) DO UPDATE SET
                 device_path = excluded.device_path,
                 local_path = excluded.local_path,
                 transfer_ts = excluded.transfer_ts,
                 size = excluded.size,
                 mtime = excluded.mtime",
            params![
                hash,
                device_path,
                local_path,
                transfer_ts as i64,
                size as i64,
                mtime as i64
            ],
        )?;
        Ok(())
    }

    /// Timestamp of the last completed sync (0 if none recorded).
    pub fn last_sync_time(&self) -> Result<u64, IndexError> {
        let conn = self.conn();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = 'last_sync_time'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub fn set_last_sync_time(&self, ts: u64) -> Result<(), IndexError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sync_metadata (key, value) VALUES ('last_sync_time', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [ts.to_string()],
        )?;
        Ok(())
    }

    /// Number of indexed files.
    pub fn count(&self) -> Result<u64, IndexError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Sum of the sizes of all indexed files, in bytes.
    pub fn total_bytes_transferred(&self) -> Result<u64, IndexError> {
        let conn = self.conn();
        let total: Option<i64> =
            conn.query_row("SELECT SUM(size) FROM photos", [], |row| row.get(0))?;
        Ok(total.unwrap_or(0) as u64)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
