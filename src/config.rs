//! Engine configuration.
//!
//! Everything has a working default; deployments override through process
//! environment variables or a `.env` file in the data directory.

use crate::worker::acquire::AcquirePolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default grace window before a completed task is dropped from the
/// registry, long enough for a reconnecting observer to catch it.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Default hard ceiling on one pipeline run, acquisition through summary.
pub const DEFAULT_PIPELINE_DEADLINE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root for the SQLite store and the `.env` file.
    pub data_dir: PathBuf,
    /// Where fetched media lands before transcription; swept afterwards.
    pub scratch_dir: PathBuf,

    /// Path or bare name (resolved from PATH) of the yt-dlp binary.
    pub yt_dlp_path: PathBuf,
    pub whisper_cli_path: PathBuf,
    pub whisper_model_path: PathBuf,

    pub ollama_base_url: String,
    pub ollama_model: String,

    /// Cached summaries older than this are purged.
    pub cache_retention_days: i64,
    /// Hard ceiling on cached summaries; oldest are purged first.
    pub cache_capacity: usize,
    /// Per-key status log length; oldest entries are dropped on overflow.
    pub status_log_cap: usize,
    /// Status logs idle longer than this are removed by the daily sweep.
    pub status_log_retention_days: i64,

    pub grace_period: Duration,
    /// `None` lets a pipeline run unbounded, as the pre-deadline behavior.
    pub pipeline_deadline: Option<Duration>,

    pub acquire: AcquirePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| home.join(".local").join("share"))
            .join("tubedigest");

        let whisper_root = home.join("bin").join("whisper-cpp").join("whisper.cpp");

        Self {
            scratch_dir: data_dir.join("media"),
            data_dir,
            yt_dlp_path: PathBuf::from("yt-dlp"),
            whisper_cli_path: whisper_root.join("build").join("bin").join("whisper-cli"),
            whisper_model_path: whisper_root.join("models").join("ggml-tiny.bin"),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2:1b".to_string(),
            cache_retention_days: 7,
            cache_capacity: 100,
            status_log_cap: 20,
            status_log_retention_days: 30,
            grace_period: DEFAULT_GRACE_PERIOD,
            pipeline_deadline: Some(DEFAULT_PIPELINE_DEADLINE),
            acquire: AcquirePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by process environment, then the data dir's
    /// `.env` file.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup(&config.data_dir, "TUBEDIGEST_DATA_DIR") {
            config.data_dir = PathBuf::from(&dir);
            config.scratch_dir = config.data_dir.join("media");
        }
        if let Some(url) = lookup(&config.data_dir, "LLAMA_BASE_URL") {
            config.ollama_base_url = url;
        }
        if let Some(model) = lookup(&config.data_dir, "LLAMA_MODEL") {
            config.ollama_model = model;
        }
        if let Some(path) = lookup(&config.data_dir, "YT_DLP_PATH") {
            config.yt_dlp_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(&config.data_dir, "WHISPER_CLI_PATH") {
            config.whisper_cli_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(&config.data_dir, "WHISPER_MODEL_PATH") {
            config.whisper_model_path = PathBuf::from(path);
        }

        config
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("tubedigest.db")
    }
}

fn lookup(data_dir: &Path, key: &str) -> Option<String> {
    if let Ok(value) = std::env::var(key) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    load_env_value(data_dir, key)
}

/// Load a value from the `.env` file by key name.
pub fn load_env_value(data_dir: &Path, key: &str) -> Option<String> {
    let env_path = data_dir.join(".env");
    let prefix = format!("{}=", key);
    if let Ok(content) = std::fs::read_to_string(&env_path) {
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with(&prefix) {
                let value = trimmed[prefix.len()..]
                    .trim()
                    .trim_matches('"')
                    .trim_matches('\'');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
