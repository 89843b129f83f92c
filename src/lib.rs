//! tubedigest: background summarization engine for YouTube videos.
//!
//! A host hands in a video reference; the engine acquires the audio
//! through a fallback matrix, transcribes it with whisper-cli, summarizes
//! the transcript with a local LLM, and keeps the result in a durable
//! cache so an observer that disconnected mid-task can recover it. One
//! pipeline per key, ever: concurrent submissions for the same video get
//! a duplicate signal, and a cached key never starts work at all.

mod cache;
mod config;
mod database;
pub mod error;
mod events;
mod ollama;
mod reconcile;
mod registry;
mod video;
mod worker;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use cache::ResultCache;
use database::Database;
use events::Broadcaster;
use registry::{Claim, TaskRegistry};
use worker::{run_pipeline, PipelineDeps};

pub use config::EngineConfig;
pub use database::{CacheEntry, StatusEntry, TaskSnapshot, TaskState};
pub use error::{AppError, FailureKind};
pub use events::EngineEvent;
pub use ollama::{OllamaClient, OllamaStatus};
pub use reconcile::ViewState;
pub use video::extract_video_id;
pub use worker::acquire::{
    AcquirePolicy, FetchRequest, IdentityProfile, MediaSource, YtDlpFetcher,
};
pub use worker::transcribe::{SpeechToText, WhisperCli};
pub use worker::Summarizer;

/// Counters for a host's status panel.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub cached_summaries: i64,
    pub active_tasks: usize,
}

/// Immediate answer to a submission.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// A finished summary already existed; no task was created.
    Cached { summary: String },
    /// A pipeline for this key is already in flight. Not an error — do
    /// not retry, just observe.
    Duplicate,
    /// A fresh pipeline is now running detached from this call.
    Started,
}

pub struct Engine {
    db: Arc<Database>,
    deps: Arc<PipelineDeps>,
}

impl Engine {
    /// Wire the engine with the default external tools: yt-dlp,
    /// whisper-cli, and Ollama, located per the config.
    pub fn new(config: EngineConfig) -> Result<Self, AppError> {
        let source = Arc::new(YtDlpFetcher::new(config.yt_dlp_path.clone()));
        let stt = Arc::new(WhisperCli::new(
            config.whisper_cli_path.clone(),
            config.whisper_model_path.clone(),
        ));
        let summarizer = Arc::new(OllamaClient::new(
            &config.ollama_base_url,
            &config.ollama_model,
        ));
        Self::with_services(config, source, stt, summarizer)
    }

    /// Wire the engine with injected collaborators. This is the seam the
    /// default constructor goes through, and what tests double.
    pub fn with_services(
        config: EngineConfig,
        source: Arc<dyn MediaSource>,
        stt: Arc<dyn SpeechToText>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self, AppError> {
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.scratch_dir)?;

        let db = Arc::new(Database::new(&config.db_path())?);
        let cache = Arc::new(ResultCache::load(
            db.clone(),
            chrono::Duration::days(config.cache_retention_days),
            config.cache_capacity,
        )?);
        let broadcaster = Arc::new(Broadcaster::new(db.clone(), config.status_log_cap));
        let registry = Arc::new(TaskRegistry::new());

        log::info!(
            "Engine initialized: {} cached summaries (data dir: {:?})",
            cache.len(),
            config.data_dir
        );

        Ok(Self {
            db,
            deps: Arc::new(PipelineDeps {
                config: Arc::new(config),
                registry,
                cache,
                broadcaster,
                source,
                stt,
                summarizer,
            }),
        })
    }

    /// Submit a video for summarization.
    ///
    /// Returns synchronously; a `Started` pipeline runs detached. Must be
    /// called from within a Tokio runtime.
    pub fn submit(&self, target: &str, title_hint: Option<&str>) -> Result<SubmitOutcome, AppError> {
        let video_id = video::extract_video_id(target)
            .ok_or_else(|| AppError::InvalidTarget(target.to_string()))?;
        let title = title_hint
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| video::default_title(&video_id));

        // Cache takes priority over everything: a hit never touches the
        // registry
        if let Some(entry) = self.deps.cache.get(&video_id) {
            log::info!("Cache hit for {}", video_id);
            return Ok(SubmitOutcome::Cached {
                summary: entry.summary,
            });
        }

        match self.deps.registry.try_claim(&video_id, &title) {
            Claim::AlreadyRunning => {
                log::info!("Duplicate submission for {} rejected", video_id);
                Ok(SubmitOutcome::Duplicate)
            }
            Claim::Claimed => {
                self.deps.broadcaster.log_status(&video_id, "Starting...");
                tokio::spawn(run_pipeline(self.deps.clone(), video_id, title));
                Ok(SubmitOutcome::Started)
            }
        }
    }

    /// Current task state for a key, if one is in the registry.
    pub fn task_status(&self, target: &str) -> Option<TaskSnapshot> {
        let video_id = video::extract_video_id(target)?;
        self.deps.registry.snapshot(&video_id)
    }

    /// The cached summary for a key, if any.
    pub fn cached_summary(&self, target: &str) -> Option<CacheEntry> {
        let video_id = video::extract_video_id(target)?;
        self.deps.cache.get(&video_id)
    }

    /// The key's durable status history, oldest first.
    pub fn status_log(&self, target: &str) -> Vec<StatusEntry> {
        match video::extract_video_id(target) {
            Some(video_id) => self.deps.broadcaster.status_log(&video_id),
            None => Vec::new(),
        }
    }

    /// Run the reconciliation protocol for a reconnecting observer.
    pub fn reconcile(&self, target: &str) -> ViewState {
        match video::extract_video_id(target) {
            Some(video_id) => reconcile::reconcile(
                &self.deps.cache,
                &self.deps.registry,
                &self.deps.broadcaster,
                &video_id,
            ),
            None => ViewState::Idle,
        }
    }

    /// Watch every key's events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.deps.broadcaster.subscribe()
    }

    /// Watch one key's events.
    pub fn subscribe_key(&self, target: &str) -> Option<broadcast::Receiver<EngineEvent>> {
        let video_id = video::extract_video_id(target)?;
        Some(self.deps.broadcaster.subscribe_key(&video_id))
    }

    /// One-shot convenience: submit and wait for the terminal outcome.
    /// Goes through the same dedup and cache paths as `submit`.
    pub async fn summarize_blocking(
        &self,
        target: &str,
        title_hint: Option<&str>,
    ) -> Result<String, AppError> {
        let video_id = video::extract_video_id(target)
            .ok_or_else(|| AppError::InvalidTarget(target.to_string()))?;

        // Subscribe before submitting so the completion can't slip past
        let mut rx = self.deps.broadcaster.subscribe_key(&video_id);

        if let SubmitOutcome::Cached { summary } = self.submit(target, title_hint)? {
            return Ok(summary);
        }

        loop {
            match rx.recv().await {
                Ok(EngineEvent::Completed { summary, .. }) => return Ok(summary),
                Ok(EngineEvent::Failed { message, .. }) => return Err(AppError::Other(message)),
                Ok(EngineEvent::Status { .. }) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(AppError::Other("engine shut down".to_string()))
                }
            }
        }
    }

    pub fn stats(&self) -> Result<EngineStats, AppError> {
        Ok(EngineStats {
            cached_summaries: self.db.summary_count()?,
            active_tasks: self.deps.registry.active_count(),
        })
    }

    /// Reachability/availability of the summarization backend.
    pub async fn summarizer_status(&self) -> Result<OllamaStatus, String> {
        let client = OllamaClient::new(
            &self.deps.config.ollama_base_url,
            &self.deps.config.ollama_model,
        );
        client.health_check().await
    }

    /// Spawn the periodic maintenance agents. The returned token stops
    /// them; dropping it does not.
    pub fn spawn_maintenance(&self) -> CancellationToken {
        let cancel = CancellationToken::new();

        // Hourly cache eviction sweep — `put` already evicts, this one
        // ages out entries while the engine sits idle
        let cache = self.deps.cache.clone();
        let sweep_cancel = cancel.clone();
        tokio::spawn(async move {
            log::info!("Cache eviction sweep started (hourly)");
            loop {
                tokio::select! {
                    _ = sweep_cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {
                        match cache.evict() {
                            Ok(0) => {}
                            Ok(n) => log::info!("Periodic sweep evicted {} summaries", n),
                            Err(e) => log::warn!("Cache eviction sweep failed: {}", e),
                        }
                    }
                }
            }
        });

        // Daily status-log sweep, separate policy from cache eviction
        let db = self.db.clone();
        let retention = chrono::Duration::days(self.deps.config.status_log_retention_days);
        let log_cancel = cancel.clone();
        tokio::spawn(async move {
            log::info!("Status log sweep started (daily)");
            loop {
                tokio::select! {
                    _ = log_cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(24 * 3600)) => {
                        match db.purge_stale_status_logs(retention) {
                            Ok(0) => {}
                            Ok(n) => log::info!("Status log sweep removed {} entries", n),
                            Err(e) => log::warn!("Status log sweep failed: {}", e),
                        }
                    }
                }
            }
        });

        cancel
    }
}
