//! Result cache: completed summaries keyed by video ID.
//!
//! The in-memory map is a cache-of-the-cache, rebuilt from the durable
//! store at startup. `put` writes through before returning, so a host
//! restart never loses a delivered summary.

use crate::database::{CacheEntry, Database};
use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct ResultCache {
    db: Arc<Database>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    retention: Duration,
    capacity: usize,
}

impl ResultCache {
    /// Rebuild from the durable store, evicting anything that aged out or
    /// overflowed while the process was down.
    pub fn load(db: Arc<Database>, retention: Duration, capacity: usize) -> Result<Self> {
        let loaded = db.load_summaries()?;
        let count = loaded.len();

        let cache = Self {
            db,
            entries: Mutex::new(loaded.into_iter().map(|e| (e.video_id.clone(), e)).collect()),
            retention,
            capacity,
        };

        let evicted = cache.evict()?;
        log::info!(
            "Summary cache loaded: {} entries ({} evicted at startup)",
            count - evicted,
            evicted
        );

        Ok(cache)
    }

    pub fn get(&self, video_id: &str) -> Option<CacheEntry> {
        self.entries.lock().unwrap().get(video_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Write-through insert followed by an eviction pass.
    pub fn put(&self, video_id: &str, summary: &str, title: &str) -> Result<()> {
        let entry = CacheEntry {
            video_id: video_id.to_string(),
            summary: summary.to_string(),
            title: title.to_string(),
            produced_at: Utc::now(),
        };

        self.db.upsert_summary(&entry)?;
        self.entries
            .lock()
            .unwrap()
            .insert(video_id.to_string(), entry);

        self.evict()?;
        Ok(())
    }

    /// Two-phase eviction: age first (bounds staleness), then capacity,
    /// oldest-by-`produced_at` first (bounds storage). Returns how many
    /// entries were removed.
    pub fn evict(&self) -> Result<usize> {
        let mut purged: Vec<String> = Vec::new();

        {
            let mut entries = self.entries.lock().unwrap();
            let cutoff = Utc::now() - self.retention;

            purged.extend(
                entries
                    .values()
                    .filter(|e| e.produced_at < cutoff)
                    .map(|e| e.video_id.clone()),
            );
            for video_id in &purged {
                entries.remove(video_id);
            }

            if entries.len() > self.capacity {
                let mut by_age: Vec<(String, chrono::DateTime<Utc>)> = entries
                    .values()
                    .map(|e| (e.video_id.clone(), e.produced_at))
                    .collect();
                by_age.sort_by(|a, b| b.1.cmp(&a.1));

                for (video_id, _) in by_age.split_off(self.capacity) {
                    entries.remove(&video_id);
                    purged.push(video_id);
                }
            }
        }

        if !purged.is_empty() {
            self.db.delete_summaries(&purged)?;
            log::info!("Evicted {} cached summaries", purged.len());
        }

        Ok(purged.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(retention_days: i64, capacity: usize) -> (ResultCache, Arc<Database>, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        let cache =
            ResultCache::load(db.clone(), Duration::days(retention_days), capacity).unwrap();
        (cache, db, temp)
    }

    #[test]
    fn test_put_then_get() {
        let (cache, _db, _temp) = setup(7, 100);
        cache.put("abc", "summary text", "A Title").unwrap();

        let entry = cache.get("abc").unwrap();
        assert_eq!(entry.summary, "summary text");
        assert_eq!(entry.title, "A Title");
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn test_put_writes_through_to_durable_store() {
        let (cache, db, _temp) = setup(7, 100);
        cache.put("abc", "summary text", "A Title").unwrap();

        let stored = db.get_summary("abc").unwrap().unwrap();
        assert_eq!(stored.summary, "summary text");
    }

    #[test]
    fn test_capacity_eviction_drops_oldest() {
        let (cache, _db, _temp) = setup(7, 3);

        for key in ["v1", "v2", "v3", "v4"] {
            cache.put(key, "s", "t").unwrap();
            // Distinct produced_at ordering
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert_eq!(cache.len(), 3);
        assert!(cache.get("v1").is_none(), "oldest entry should be gone");
        assert!(cache.get("v4").is_some());
    }

    #[test]
    fn test_eviction_bound_holds_over_many_puts() {
        let (cache, db, _temp) = setup(7, 3);

        for i in 0..20 {
            cache.put(&format!("v{}", i), "s", "t").unwrap();
        }

        assert!(cache.len() <= 3);
        assert!(db.summary_count().unwrap() <= 3);
    }

    #[test]
    fn test_age_eviction_purges_stale_entries() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());

        // Seed the durable store with one stale and one fresh entry
        db.upsert_summary(&CacheEntry {
            video_id: "stale".to_string(),
            summary: "old".to_string(),
            title: "t".to_string(),
            produced_at: Utc::now() - Duration::days(10),
        })
        .unwrap();
        db.upsert_summary(&CacheEntry {
            video_id: "fresh".to_string(),
            summary: "new".to_string(),
            title: "t".to_string(),
            produced_at: Utc::now(),
        })
        .unwrap();

        let cache = ResultCache::load(db.clone(), Duration::days(7), 100).unwrap();

        assert!(cache.get("stale").is_none());
        assert!(cache.get("fresh").is_some());
        assert!(db.get_summary("stale").unwrap().is_none());
    }

    #[test]
    fn test_rebuilds_from_durable_store() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("test.db");

        {
            let db = Arc::new(Database::new(&db_path).unwrap());
            let cache = ResultCache::load(db, Duration::days(7), 100).unwrap();
            cache.put("abc", "survives restart", "T").unwrap();
        }

        let db = Arc::new(Database::new(&db_path).unwrap());
        let cache = ResultCache::load(db, Duration::days(7), 100).unwrap();
        assert_eq!(cache.get("abc").unwrap().summary, "survives restart");
    }
}
