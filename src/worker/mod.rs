//! Pipeline driver.
//!
//! One detached task per video ID walks the stages
//! acquiring → transcribing → summarizing, reporting each transition to
//! the registry, the status log, and any live observers. Success writes
//! the cache entry before the completion broadcast goes out; failure
//! caches nothing, so the user's next submission starts fresh.

pub mod acquire;
pub mod transcribe;

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::database::TaskState;
use crate::error::FailureKind;
use crate::events::{Broadcaster, EngineEvent};
use crate::registry::TaskRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use acquire::{acquire_media, MediaSource};
use transcribe::SpeechToText;

/// Summarization black box: transcript in, summary text out.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str, title: &str) -> Result<String, String>;
}

/// Everything a pipeline run needs, shared by all keys.
pub struct PipelineDeps {
    pub config: Arc<EngineConfig>,
    pub registry: Arc<TaskRegistry>,
    pub cache: Arc<ResultCache>,
    pub broadcaster: Arc<Broadcaster>,
    pub source: Arc<dyn MediaSource>,
    pub stt: Arc<dyn SpeechToText>,
    pub summarizer: Arc<dyn Summarizer>,
}

struct StageFailure {
    kind: FailureKind,
    message: String,
}

/// Drive one key's pipeline to a terminal state. Runs detached from the
/// submitting call; observers follow along via broadcasts or polling.
pub async fn run_pipeline(deps: Arc<PipelineDeps>, video_id: String, title: String) {
    let start = Instant::now();
    log::info!("Pipeline started for {}", video_id);

    let outcome = match deps.config.pipeline_deadline {
        Some(limit) => match tokio::time::timeout(limit, drive(&deps, &video_id, &title)).await {
            Ok(result) => result,
            Err(_) => Err(StageFailure {
                kind: FailureKind::Generic,
                message: format!(
                    "Processing exceeded the {} minute limit",
                    limit.as_secs() / 60
                ),
            }),
        },
        None => drive(&deps, &video_id, &title).await,
    };

    match outcome {
        Ok(summary) => {
            // Cache before announcing: an observer reacting to the
            // completion event must find the entry already durable
            if let Err(e) = deps.cache.put(&video_id, &summary, &title) {
                log::error!("Failed to cache summary for {}: {}", video_id, e);
            }
            deps.registry.complete(&video_id, &summary);
            deps.broadcaster.log_status(&video_id, "Summary ready");
            deps.broadcaster.emit(EngineEvent::Completed {
                video_id: video_id.clone(),
                summary,
            });
            log::info!(
                "Pipeline for {} completed in {:.1}s",
                video_id,
                start.elapsed().as_secs_f64()
            );

            // Keep the completed task around briefly so a reconnecting
            // observer polling the registry still sees it
            let registry = deps.registry.clone();
            let grace = deps.config.grace_period;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                registry.remove_if_terminal(&video_id);
            });
        }
        Err(failure) => {
            log::error!(
                "Pipeline for {} failed ({}): {}",
                video_id,
                failure.kind,
                failure.message
            );
            deps.broadcaster
                .log_status(&video_id, &format!("Failed: {}", failure.message));
            deps.registry.fail(&video_id, failure.kind, &failure.message);
            deps.broadcaster.emit(EngineEvent::Failed {
                video_id,
                kind: failure.kind,
                message: failure.message,
            });
        }
    }
}

async fn drive(
    deps: &PipelineDeps,
    video_id: &str,
    title: &str,
) -> Result<String, StageFailure> {
    deps.registry.set_state(video_id, TaskState::Acquiring);
    deps.broadcaster
        .log_status(video_id, "Downloading audio from YouTube...");

    let media = acquire_media(
        deps.source.as_ref(),
        &deps.config.acquire,
        video_id,
        &deps.config.scratch_dir,
    )
    .await
    .map_err(|e| StageFailure {
        kind: e.kind,
        message: e.message,
    })?;

    deps.registry.set_state(video_id, TaskState::Transcribing);
    deps.broadcaster
        .log_status(video_id, "Audio downloaded, starting transcription...");

    let transcript_result = deps.stt.transcribe(&media).await;

    // The media file is spent either way; keep the scratch dir clean so
    // stale audio can never feed a later transcription
    let _ = tokio::fs::remove_file(&media).await;
    acquire::sweep_scratch(&deps.config.scratch_dir, video_id);

    let transcript = transcript_result.map_err(|e| StageFailure {
        kind: classify_adapter_error(&e),
        message: format!("Could not transcribe video audio: {}", e),
    })?;

    deps.registry.set_state(video_id, TaskState::Summarizing);
    deps.broadcaster
        .log_status(video_id, "Transcription completed, generating summary with AI...");

    let summary = deps
        .summarizer
        .summarize(&transcript, title)
        .await
        .map_err(|e| StageFailure {
            kind: classify_adapter_error(&e),
            message: format!("Could not generate summary: {}", e),
        })?;

    Ok(summary)
}

/// Map an adapter error onto the failure taxonomy. Adapters are black
/// boxes, so this is marker-based: connection problems and quota/auth
/// rejections get their own kinds, everything else is generic.
pub fn classify_adapter_error(message: &str) -> FailureKind {
    let lower = message.to_lowercase();

    const NETWORK_MARKERS: [&str; 5] =
        ["connection", "connect", "refused", "dns", "unreachable"];
    const UPSTREAM_MARKERS: [&str; 6] =
        ["quota", "api key", "unauthorized", "401", "403", "billing"];

    if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::Network
    } else if UPSTREAM_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::Upstream
    } else {
        FailureKind::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_classification() {
        assert_eq!(
            classify_adapter_error("Connection error to Llama server: refused"),
            FailureKind::Network
        );
        assert_eq!(
            classify_adapter_error("Ollama returned 401: bad api key"),
            FailureKind::Upstream
        );
        assert_eq!(
            classify_adapter_error("quota exceeded for this month"),
            FailureKind::Upstream
        );
        assert_eq!(
            classify_adapter_error("whisper-cli failed with status 1"),
            FailureKind::Generic
        );
    }
}
