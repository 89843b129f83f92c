//! Client reconciliation.
//!
//! A reconnecting observer must recover current truth without starting
//! duplicate work. The lookup order is a deliberate tie-break: the cache
//! always reflects a final answer and is cheapest, an active task must be
//! detected even on a cache miss (or the observer would offer to start a
//! second pipeline), and a just-completed task in its grace window is the
//! last chance to catch a result the cache write missed. Running the
//! protocol twice with no state change in between yields the same view.

use crate::cache::ResultCache;
use crate::database::{StatusEntry, TaskState};
use crate::events::Broadcaster;
use crate::registry::TaskRegistry;
use serde::Serialize;

/// What an observer should render for a key right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ViewState {
    /// A finished summary from an earlier run.
    Cached {
        summary: String,
        title: String,
        log: Vec<StatusEntry>,
    },
    /// A pipeline is running; subscribe for further broadcasts.
    InProgress { state: TaskState, progress: u8 },
    /// Completed moments ago, still inside the registry grace window.
    Fresh { summary: String },
    /// Nothing known; offer to start.
    Idle,
}

pub fn reconcile(
    cache: &ResultCache,
    registry: &TaskRegistry,
    broadcaster: &Broadcaster,
    video_id: &str,
) -> ViewState {
    if let Some(entry) = cache.get(video_id) {
        return ViewState::Cached {
            summary: entry.summary,
            title: entry.title,
            log: broadcaster.status_log(video_id),
        };
    }

    if let Some(snapshot) = registry.snapshot(video_id) {
        if !snapshot.state.is_terminal() {
            return ViewState::InProgress {
                state: snapshot.state,
                progress: snapshot.progress,
            };
        }
        if snapshot.state == TaskState::Completed {
            if let Some(summary) = snapshot.summary {
                return ViewState::Fresh { summary };
            }
        }
    }

    ViewState::Idle
}
