//! Speech-to-text stage.
//!
//! Wraps whisper-cli behind the `SpeechToText` seam. The engine treats
//! transcription as a black box: media file in, transcript text out.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, media: &Path) -> Result<String, String>;
}

/// Default `SpeechToText`: spawns whisper-cli and reads its text output.
pub struct WhisperCli {
    cli_path: PathBuf,
    model_path: PathBuf,
}

impl WhisperCli {
    pub fn new(cli_path: PathBuf, model_path: PathBuf) -> Self {
        Self {
            cli_path,
            model_path,
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperCli {
    async fn transcribe(&self, media: &Path) -> Result<String, String> {
        if !media.exists() {
            return Err(format!("Audio file not found: {:?}", media));
        }
        if !self.model_path.exists() {
            return Err(format!("Model not found: {:?}", self.model_path));
        }

        // whisper-cli appends ".txt" to the output base, so strip the
        // media extension and let it land next to the file
        let output_base = media.with_extension("");

        log::info!("Running whisper-cli: {:?}", media);

        let output = Command::new(&self.cli_path)
            .args([
                "-m",
                self.model_path.to_str().ok_or("model path is not UTF-8")?,
                "-f",
                media.to_str().ok_or("media path is not UTF-8")?,
                "-otxt",
                "-of",
                output_base.to_str().ok_or("output path is not UTF-8")?,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Failed to spawn whisper-cli: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no output");
            return Err(format!(
                "whisper-cli failed with status {}: {}",
                output.status, tail
            ));
        }

        let transcript_path = output_base.with_extension("txt");
        let transcript = tokio::fs::read_to_string(&transcript_path)
            .await
            .map_err(|e| format!("Failed to read transcript {:?}: {}", transcript_path, e))?;
        let _ = tokio::fs::remove_file(&transcript_path).await;

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Err("Transcription produced no text".to_string());
        }

        log::info!("Transcription complete: {} characters", transcript.len());
        Ok(transcript)
    }
}
