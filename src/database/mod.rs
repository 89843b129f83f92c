pub mod models;


use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use models::*;

/// Durable store behind the result cache and the status logs.
///
/// Single authoritative tier: every mutation lands here before the call
/// returns, and the in-memory caches are rebuilt from it at startup.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                video_id TEXT PRIMARY KEY,
                summary TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                produced_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_summaries_produced
                ON summaries(produced_at);

            CREATE TABLE IF NOT EXISTS status_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                message TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_status_log_video
                ON status_log(video_id, id);
        "#,
        )?;
        Ok(())
    }

    // ── Summaries ──────────────────────────────────────────────────────────

    /// Insert or overwrite the cached summary for a key.
    pub fn upsert_summary(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO summaries (video_id, summary, title, produced_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(video_id) DO UPDATE SET
                summary = excluded.summary,
                title = excluded.title,
                produced_at = excluded.produced_at",
            params![
                entry.video_id,
                entry.summary,
                entry.title,
                entry.produced_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Durable read for a single key. The engine itself reads through
    /// the in-memory cache.
    #[allow(dead_code)]
    pub fn get_summary(&self, video_id: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT video_id, summary, title, produced_at
                 FROM summaries WHERE video_id = ?1",
                params![video_id],
                row_to_cache_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// All cached summaries, for rebuilding the in-memory map at startup.
    pub fn load_summaries(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT video_id, summary, title, produced_at
             FROM summaries ORDER BY produced_at DESC",
        )?;
        let entries = stmt
            .query_map([], row_to_cache_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn delete_summaries(&self, video_ids: &[String]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut removed = 0;
        for video_id in video_ids {
            removed += conn.execute(
                "DELETE FROM summaries WHERE video_id = ?1",
                params![video_id],
            )?;
        }
        Ok(removed)
    }

    pub fn summary_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM summaries", [], |r| r.get(0))?;
        Ok(count)
    }

    // ── Status log ─────────────────────────────────────────────────────────

    /// Append one status line and trim the key's history to `cap` entries,
    /// oldest dropped first.
    pub fn append_status(&self, video_id: &str, message: &str, cap: usize) -> Result<StatusEntry> {
        let entry = StatusEntry {
            timestamp: Utc::now().to_rfc3339(),
            message: message.to_string(),
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO status_log (video_id, timestamp, message) VALUES (?1, ?2, ?3)",
            params![video_id, entry.timestamp, entry.message],
        )?;
        conn.execute(
            "DELETE FROM status_log
             WHERE video_id = ?1
               AND id NOT IN (
                   SELECT id FROM status_log
                   WHERE video_id = ?1
                   ORDER BY id DESC LIMIT ?2
               )",
            params![video_id, cap as i64],
        )?;
        Ok(entry)
    }

    /// The key's history, oldest first.
    pub fn get_status_log(&self, video_id: &str) -> Result<Vec<StatusEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, message FROM status_log
             WHERE video_id = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![video_id], |row| {
                Ok(StatusEntry {
                    timestamp: row.get(0)?,
                    message: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Drop whole histories whose newest entry is older than the retention
    /// window. Run by the daily sweep, independent of cache eviction.
    pub fn purge_stale_status_logs(&self, retention: Duration) -> Result<usize> {
        let cutoff = (Utc::now() - retention).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM status_log
             WHERE video_id IN (
                 SELECT video_id FROM status_log
                 GROUP BY video_id
                 HAVING MAX(timestamp) < ?1
             )",
            params![cutoff],
        )?;
        Ok(removed)
    }
}

fn row_to_cache_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    let produced_at: String = row.get(3)?;
    Ok(CacheEntry {
        video_id: row.get(0)?,
        summary: row.get(1)?,
        title: row.get(2)?,
        produced_at: parse_timestamp(&produced_at),
    })
}

/// RFC 3339 parse with an epoch fallback, so one corrupt row ages out
/// instead of poisoning startup.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now))
}
