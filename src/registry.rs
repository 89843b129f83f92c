//! Task registry: at most one non-terminal task per video ID.
//!
//! The claim check is a check-and-set under one lock, so any number of
//! near-simultaneous submissions for a fresh key start exactly one
//! pipeline. Reads hand out cloned snapshots; only the pipeline driver
//! mutates task state.

use crate::database::{TaskSnapshot, TaskState};
use crate::error::FailureKind;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Task {
    title: String,
    state: TaskState,
    created_at: DateTime<Utc>,
    summary: Option<String>,
}

/// Outcome of an atomic claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// No active task existed; a fresh `queued` task now does.
    Claimed,
    /// A non-terminal task is already driving this key.
    AlreadyRunning,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim a key. A terminal leftover (completed task still
    /// inside its grace window) is replaced by the fresh task.
    pub fn try_claim(&self, video_id: &str, title: &str) -> Claim {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(existing) = tasks.get(video_id) {
            if !existing.state.is_terminal() {
                return Claim::AlreadyRunning;
            }
        }
        tasks.insert(
            video_id.to_string(),
            Task {
                title: title.to_string(),
                state: TaskState::Queued,
                created_at: Utc::now(),
                summary: None,
            },
        );
        Claim::Claimed
    }

    /// Advance a task. Backward or sideways transitions are rejected —
    /// the state machine only moves forward.
    pub fn set_state(&self, video_id: &str, state: TaskState) {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(video_id) {
            Some(task) if state.rank() > task.state.rank() => {
                task.state = state;
            }
            Some(task) => {
                log::warn!(
                    "Ignoring backward transition for {}: {} -> {}",
                    video_id,
                    task.state,
                    state
                );
            }
            None => {
                log::warn!("Transition for unknown task {}: {}", video_id, state);
            }
        }
    }

    /// Terminal success: attach the summary so observers polling inside
    /// the grace window still get the result.
    pub fn complete(&self, video_id: &str, summary: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(video_id) {
            task.state = TaskState::Completed;
            task.summary = Some(summary.to_string());
        }
    }

    /// Terminal failure: drop the task at once. There is no result to
    /// hand off, so no grace window applies; the failure reaches
    /// observers through the broadcast and the status log.
    pub fn fail(&self, video_id: &str, kind: FailureKind, message: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.remove(video_id).is_some() {
            log::info!("Task {} failed ({}): {}", video_id, kind, message);
        }
    }

    /// Drop a task once its grace window elapses, but only if it is still
    /// the same terminal task — a fresh claim for the key must survive.
    pub fn remove_if_terminal(&self, video_id: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks
            .get(video_id)
            .map(|t| t.state.is_terminal())
            .unwrap_or(false)
        {
            tasks.remove(video_id);
        }
    }

    pub fn snapshot(&self, video_id: &str) -> Option<TaskSnapshot> {
        let tasks = self.tasks.lock().unwrap();
        tasks.get(video_id).map(|task| TaskSnapshot {
            video_id: video_id.to_string(),
            title: task.title.clone(),
            state: task.state,
            progress: task.state.progress_hint(),
            created_at: task.created_at,
            summary: task.summary.clone(),
        })
    }

    pub fn active_count(&self) -> usize {
        let tasks = self.tasks.lock().unwrap();
        tasks.values().filter(|t| !t.state.is_terminal()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_then_duplicate() {
        let registry = TaskRegistry::new();
        assert_eq!(registry.try_claim("abc", "T"), Claim::Claimed);
        assert_eq!(registry.try_claim("abc", "T"), Claim::AlreadyRunning);
        // Other keys are unaffected
        assert_eq!(registry.try_claim("xyz", "T"), Claim::Claimed);
    }

    #[test]
    fn test_claim_replaces_terminal_leftover() {
        let registry = TaskRegistry::new();
        registry.try_claim("abc", "T");
        registry.complete("abc", "done");

        // Completed task sits in its grace window; a new claim wins
        assert_eq!(registry.try_claim("abc", "T"), Claim::Claimed);
        let snap = registry.snapshot("abc").unwrap();
        assert_eq!(snap.state, TaskState::Queued);
        assert!(snap.summary.is_none());
    }

    #[test]
    fn test_transitions_only_move_forward() {
        let registry = TaskRegistry::new();
        registry.try_claim("abc", "T");
        registry.set_state("abc", TaskState::Transcribing);
        // A late acquiring update must not rewind the task
        registry.set_state("abc", TaskState::Acquiring);

        assert_eq!(
            registry.snapshot("abc").unwrap().state,
            TaskState::Transcribing
        );
    }

    #[test]
    fn test_complete_keeps_result_until_removed() {
        let registry = TaskRegistry::new();
        registry.try_claim("abc", "T");
        registry.complete("abc", "the summary");

        let snap = registry.snapshot("abc").unwrap();
        assert_eq!(snap.state, TaskState::Completed);
        assert_eq!(snap.summary.as_deref(), Some("the summary"));
        assert_eq!(snap.progress, 100);

        registry.remove_if_terminal("abc");
        assert!(registry.snapshot("abc").is_none());
    }

    #[test]
    fn test_remove_if_terminal_spares_active_tasks() {
        let registry = TaskRegistry::new();
        registry.try_claim("abc", "T");
        registry.set_state("abc", TaskState::Acquiring);

        registry.remove_if_terminal("abc");
        assert!(registry.snapshot("abc").is_some());
    }

    #[test]
    fn test_fail_removes_immediately() {
        let registry = TaskRegistry::new();
        registry.try_claim("abc", "T");
        registry.fail("abc", FailureKind::Restricted, "age gated");

        assert!(registry.snapshot("abc").is_none());
        // The key is free for a fresh pipeline right away
        assert_eq!(registry.try_claim("abc", "T"), Claim::Claimed);
    }

    #[test]
    fn test_active_count_ignores_terminal() {
        let registry = TaskRegistry::new();
        registry.try_claim("a", "T");
        registry.try_claim("b", "T");
        registry.complete("b", "s");

        assert_eq!(registry.active_count(), 1);
    }
}
