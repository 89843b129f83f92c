//! Status fan-out to live observers.
//!
//! Delivery is best-effort on two independent channels: a general
//! broadcast any control surface can watch, and targeted per-key channels
//! for surfaces pinned to one video. Either may have no receiver at any
//! instant; that is not an error. The durable status log is the record an
//! observer replays after reconnecting.

use crate::database::{Database, StatusEntry};
use crate::error::FailureKind;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Status {
        video_id: String,
        message: String,
    },
    Completed {
        video_id: String,
        summary: String,
    },
    Failed {
        video_id: String,
        kind: FailureKind,
        message: String,
    },
}

impl EngineEvent {
    pub fn video_id(&self) -> &str {
        match self {
            Self::Status { video_id, .. }
            | Self::Completed { video_id, .. }
            | Self::Failed { video_id, .. } => video_id,
        }
    }
}

pub struct Broadcaster {
    db: Arc<Database>,
    log_cap: usize,
    general: broadcast::Sender<EngineEvent>,
    targeted: Mutex<HashMap<String, broadcast::Sender<EngineEvent>>>,
}

impl Broadcaster {
    pub fn new(db: Arc<Database>, log_cap: usize) -> Self {
        let (general, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            db,
            log_cap,
            general,
            targeted: Mutex::new(HashMap::new()),
        }
    }

    /// Watch every key's events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.general.subscribe()
    }

    /// Watch one key's events.
    pub fn subscribe_key(&self, video_id: &str) -> broadcast::Receiver<EngineEvent> {
        let mut targeted = self.targeted.lock().unwrap();
        targeted
            .entry(video_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Append to the key's capped durable log, then notify observers.
    pub fn log_status(&self, video_id: &str, message: &str) {
        if let Err(e) = self.db.append_status(video_id, message, self.log_cap) {
            log::warn!("Failed to persist status for {}: {}", video_id, e);
        }
        log::info!("[{}] {}", video_id, message);
        self.emit(EngineEvent::Status {
            video_id: video_id.to_string(),
            message: message.to_string(),
        });
    }

    /// Fire on both channels. A send with no receiver just drops.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.general.send(event.clone());

        let key = event.video_id().to_string();
        let mut targeted = self.targeted.lock().unwrap();
        let channel_is_dead = match targeted.get(&key) {
            Some(tx) if tx.receiver_count() > 0 => {
                let _ = tx.send(event);
                false
            }
            Some(_) => true,
            None => false,
        };
        if channel_is_dead {
            // Last observer for this key is gone; reclaim the slot
            targeted.remove(&key);
        }
    }

    /// The key's durable history, oldest first.
    pub fn status_log(&self, video_id: &str) -> Vec<StatusEntry> {
        self.db.get_status_log(video_id).unwrap_or_else(|e| {
            log::warn!("Failed to read status log for {}: {}", video_id, e);
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(cap: usize) -> (Broadcaster, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        (Broadcaster::new(db, cap), temp)
    }

    #[tokio::test]
    async fn test_no_listener_is_not_an_error() {
        let (broadcaster, _temp) = setup(20);
        // Neither channel has a receiver; both sends just drop
        broadcaster.log_status("abc", "working");
        assert_eq!(broadcaster.status_log("abc").len(), 1);
    }

    #[tokio::test]
    async fn test_general_subscriber_receives_events() {
        let (broadcaster, _temp) = setup(20);
        let mut rx = broadcaster.subscribe();

        broadcaster.log_status("abc", "acquiring audio");

        match rx.recv().await.unwrap() {
            EngineEvent::Status { video_id, message } => {
                assert_eq!(video_id, "abc");
                assert_eq!(message, "acquiring audio");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_targeted_subscriber_receives_only_its_key() {
        let (broadcaster, _temp) = setup(20);
        let mut rx = broadcaster.subscribe_key("abc");

        broadcaster.log_status("other", "noise");
        broadcaster.log_status("abc", "signal");

        match rx.recv().await.unwrap() {
            EngineEvent::Status { video_id, message } => {
                assert_eq!(video_id, "abc");
                assert_eq!(message, "signal");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_both_channels_receive_the_same_event() {
        let (broadcaster, _temp) = setup(20);
        let mut general = broadcaster.subscribe();
        let mut targeted = broadcaster.subscribe_key("abc");

        broadcaster.emit(EngineEvent::Completed {
            video_id: "abc".to_string(),
            summary: "S".to_string(),
        });

        assert!(matches!(
            general.recv().await.unwrap(),
            EngineEvent::Completed { .. }
        ));
        assert!(matches!(
            targeted.recv().await.unwrap(),
            EngineEvent::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_log_cap_enforced() {
        let (broadcaster, _temp) = setup(5);
        for i in 0..12 {
            broadcaster.log_status("abc", &format!("step {}", i));
        }

        let log = broadcaster.status_log("abc");
        assert_eq!(log.len(), 5);
        assert_eq!(log[0].message, "step 7");
        assert_eq!(log[4].message, "step 11");
    }
}
