//! Local durable cache: an append-only SQLite table of envelopes.
//!
//! Rows are keyed by an auto-incrementing id and indexed by timestamp for
//! recency scans and retention deletes. Rows are never updated.

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use crate::{
    error::Result,
    events::{CacheRecord, Envelope, EventData},
    types::{SessionId, now_ms},
};

const CACHE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS telemetry_log (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp  INTEGER NOT NULL,
    session_id TEXT NOT NULL,
    level      TEXT NOT NULL,
    category   TEXT NOT NULL,
    message    TEXT NOT NULL,
    data       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_telemetry_log_timestamp ON telemetry_log (timestamp);
";

const SELECT_COLUMNS: &str = "SELECT id, timestamp, session_id, level, category, message, data";

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("beacon")
}

/// Default location of the local cache database.
pub fn get_cache_db_path() -> PathBuf {
    get_root_cache_dir().join("telemetry.db")
}

/// Serialized form of the whole local cache, suitable for download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalExport {
    pub exported_at: i64,
    pub records: Vec<CacheRecord>,
}

pub struct LocalCache {
    conn: Mutex<Connection>,
}

impl LocalCache {
    pub fn open(db_path: &Path) -> Result<Self> {
        let _span = info_span!("local_cache_open", path = %db_path.display()).entered();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(CACHE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CACHE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one envelope and return its local sequence key.
    pub fn append(&self, envelope: &Envelope) -> Result<i64> {
        let data = serde_json::to_string(&envelope.data)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO telemetry_log (timestamp, session_id, level, category, message, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                envelope.timestamp,
                envelope.session_id.as_str(),
                envelope.level.as_str(),
                envelope.category,
                envelope.message,
                data,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<CacheRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} FROM telemetry_log ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], read_row)?;
        collect_rows(rows)
    }

    /// Records with `start <= timestamp <= end`, oldest first.
    pub fn range(&self, start: i64, end: i64) -> Result<Vec<CacheRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} FROM telemetry_log \
             WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY timestamp, id"
        ))?;
        let rows = stmt.query_map([start, end], read_row)?;
        collect_rows(rows)
    }

    pub fn all(&self) -> Result<Vec<CacheRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} FROM telemetry_log ORDER BY id"))?;
        let rows = stmt.query_map([], read_row)?;
        collect_rows(rows)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM telemetry_log", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Delete every record strictly older than `cutoff_ms`.
    pub fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let deleted = self
            .conn()
            .execute("DELETE FROM telemetry_log WHERE timestamp < ?1", [cutoff_ms])?;
        debug!(deleted, cutoff_ms, "Deleted expired local cache records");
        Ok(deleted)
    }

    /// Drop the log table so every later write fails.
    #[cfg(test)]
    pub(crate) fn break_schema(&self) {
        let _ = self.conn().execute_batch("DROP TABLE telemetry_log");
    }

    pub fn export(&self) -> Result<LocalExport> {
        Ok(LocalExport {
            exported_at: now_ms(),
            records: self.all()?,
        })
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export()?)?)
    }

    /// Re-ingest a document produced by [`LocalCache::export_json`].
    ///
    /// Records get fresh local ids; envelope content is preserved.
    pub fn import_json(&self, document: &str) -> Result<usize> {
        let export: LocalExport = serde_json::from_str(document)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO telemetry_log (timestamp, session_id, level, category, message, data) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in &export.records {
                let env = &record.envelope;
                stmt.execute(params![
                    env.timestamp,
                    env.session_id.as_str(),
                    env.level.as_str(),
                    env.category,
                    env.message,
                    serde_json::to_string(&env.data)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(export.records.len())
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<CacheRecord> {
    let level: String = row.get(3)?;
    let data: String = row.get(6)?;
    let level = level.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let data: EventData = serde_json::from_str(&data).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(CacheRecord {
        id: row.get(0)?,
        envelope: Envelope {
            timestamp: row.get(1)?,
            session_id: SessionId::new(row.get::<_, String>(2)?),
            level,
            category: row.get(4)?,
            message: row.get(5)?,
            data,
        },
    })
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<CacheRecord>>,
) -> Result<Vec<CacheRecord>> {
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::events::Level;

    fn envelope(ts: i64, level: Level, message: &str) -> Envelope {
        let mut data = EventData::new();
        data.insert("attempt".into(), serde_json::json!(ts));
        Envelope {
            timestamp: ts,
            session_id: SessionId::new("s-1"),
            level,
            category: "Sync".into(),
            message: message.into(),
            data,
        }
    }

    fn content_key(env: &Envelope) -> String {
        serde_json::to_string(env).unwrap()
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let cache = LocalCache::open_in_memory().unwrap();
        let a = cache.append(&envelope(1, Level::Info, "a")).unwrap();
        let b = cache.append(&envelope(2, Level::Info, "b")).unwrap();
        assert!(b > a);
        assert_eq!(cache.count().unwrap(), 2);
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let cache = LocalCache::open_in_memory().unwrap();
        for ts in 1..=5 {
            cache.append(&envelope(ts, Level::Debug, "x")).unwrap();
        }
        let recent: Vec<i64> = cache
            .recent(3)
            .unwrap()
            .iter()
            .map(|r| r.envelope.timestamp)
            .collect();
        assert_eq!(recent, vec![5, 4, 3]);
    }

    #[test]
    fn range_is_inclusive() {
        let cache = LocalCache::open_in_memory().unwrap();
        for ts in [10, 20, 30, 40] {
            cache.append(&envelope(ts, Level::Warn, "x")).unwrap();
        }
        let got: Vec<i64> = cache
            .range(20, 30)
            .unwrap()
            .iter()
            .map(|r| r.envelope.timestamp)
            .collect();
        assert_eq!(got, vec![20, 30]);
    }

    #[test]
    fn delete_older_than_is_strict() {
        let cache = LocalCache::open_in_memory().unwrap();
        for ts in [100, 200, 300] {
            cache.append(&envelope(ts, Level::Error, "x")).unwrap();
        }
        assert_eq!(cache.delete_older_than(200).unwrap(), 1);
        let kept: Vec<i64> = cache
            .all()
            .unwrap()
            .iter()
            .map(|r| r.envelope.timestamp)
            .collect();
        assert_eq!(kept, vec![200, 300]);
    }

    #[test]
    fn export_then_import_preserves_content() {
        let source = LocalCache::open_in_memory().unwrap();
        source.append(&envelope(3, Level::Info, "c")).unwrap();
        source.append(&envelope(1, Level::Error, "a")).unwrap();
        source.append(&envelope(2, Level::Warn, "b")).unwrap();
        let document = source.export_json().unwrap();

        let target = LocalCache::open_in_memory().unwrap();
        assert_eq!(target.import_json(&document).unwrap(), 3);

        let original: HashSet<String> = source
            .all()
            .unwrap()
            .iter()
            .map(|r| content_key(&r.envelope))
            .collect();
        let reimported: HashSet<String> = target
            .all()
            .unwrap()
            .iter()
            .map(|r| content_key(&r.envelope))
            .collect();
        assert_eq!(original, reimported);
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("telemetry.db");
        {
            let cache = LocalCache::open(&path).unwrap();
            cache.append(&envelope(1, Level::Info, "persisted")).unwrap();
        }
        let reopened = LocalCache::open(&path).unwrap();
        let all = reopened.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].envelope.message, "persisted");
    }
}
