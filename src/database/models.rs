use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline position of an in-flight task. Transitions are strictly
/// forward; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Acquiring,
    Transcribing,
    Summarizing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Ordering rank used to reject backward transitions.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Acquiring => 1,
            Self::Transcribing => 2,
            Self::Summarizing => 3,
            Self::Completed => 4,
            Self::Failed => 4,
        }
    }

    /// Coarse percentage shown while this stage runs.
    pub fn progress_hint(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Acquiring => 10,
            Self::Transcribing => 40,
            Self::Summarizing => 80,
            Self::Completed => 100,
            Self::Failed => 100,
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Queued
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Acquiring => write!(f, "acquiring"),
            Self::Transcribing => write!(f, "transcribing"),
            Self::Summarizing => write!(f, "summarizing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<String> for TaskState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => Self::Queued,
            "acquiring" => Self::Acquiring,
            "transcribing" => Self::Transcribing,
            "summarizing" => Self::Summarizing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

/// A durable completed summary. Immutable once written; a later run for
/// the same key overwrites the whole row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub video_id: String,
    pub summary: String,
    pub title: String,
    pub produced_at: DateTime<Utc>,
}

/// One line of a per-key status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub timestamp: String,
    pub message: String,
}

/// Read-only copy of a task's current state, safe to hand to observers.
/// `summary` is attached only once the task completes, so observers
/// polling inside the grace window get the result with the state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub video_id: String,
    pub title: String,
    pub state: TaskState,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub summary: Option<String>,
}
