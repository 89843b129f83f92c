//! Ollama integration for local LLM summarization.
//!
//! Calls the Ollama REST API to turn a transcript into a short summary.

use crate::worker::Summarizer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Transcripts beyond this are truncated before prompting; small local
/// models fall over on very long contexts.
const MAX_TRANSCRIPT_CHARS: usize = 24_000;

/// Ollama client for making API calls
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Check if Ollama is running and the model is available
    pub async fn health_check(&self) -> Result<OllamaStatus, String> {
        let tags_url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&tags_url)
            .send()
            .await
            .map_err(|e| format!("Ollama not running: {}", e))?;

        if !response.status().is_success() {
            return Err("Ollama server returned error".to_string());
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;

        let model_available = tags.models.iter().any(|m| {
            m.name
                .starts_with(self.model.split(':').next().unwrap_or(&self.model))
        });

        Ok(OllamaStatus {
            running: true,
            model: self.model.clone(),
            model_available,
            available_models: tags.models.iter().map(|m| m.name.clone()).collect(),
        })
    }

    /// Generate a completion from Ollama
    pub async fn generate(&self, prompt: &str) -> Result<String, String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: Some(GenerateOptions {
                temperature: 0.7,
                top_p: 0.8,
                top_k: 40,
                num_predict: 2048,
            }),
        };

        log::info!(
            "Sending request to Ollama: model={}, prompt_len={}",
            self.model,
            prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Connection error to Llama server: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Ollama returned {}: {}", status, body));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;

        log::info!(
            "Ollama response received: {} chars, eval_duration={:?}ms",
            result.response.len(),
            result.eval_duration.map(|d| d / 1_000_000)
        );

        Ok(result.response)
    }
}

#[async_trait]
impl Summarizer for OllamaClient {
    async fn summarize(&self, transcript: &str, title: &str) -> Result<String, String> {
        let transcript = truncate_transcript(transcript, MAX_TRANSCRIPT_CHARS);
        let prompt = build_summary_prompt(transcript, title);

        let summary = self.generate(&prompt).await?;
        let summary = summary.trim().to_string();

        if summary.is_empty() {
            return Err("Empty response from the summarization model".to_string());
        }
        Ok(summary)
    }
}

fn build_summary_prompt(transcript: &str, title: &str) -> String {
    format!(
        "Create a brief, concise summary of this YouTube video transcript.\n\n\
         Video Title: {}\n\n\
         Transcript:\n{}\n\n\
         Provide a summary in this format:\n\n\
         **Summary:** (2-3 sentences max)\n\n\
         **Key Points:** (3-5 bullet points)\n\n\
         **Main Takeaway:** (1 sentence)\n\n\
         Keep it short and to the point. Focus on the most important information only.\n\
         Analyze only this specific transcript.",
        title, transcript
    )
}

/// Cut on a char boundary; a mid-word cut is fine for a summary prompt.
fn truncate_transcript(transcript: &str, max_chars: usize) -> &str {
    if transcript.chars().count() <= max_chars {
        return transcript;
    }
    let end = transcript
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(transcript.len());
    &transcript[..end]
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

// ============================================================================
// Public Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaStatus {
    pub running: bool,
    pub model: String,
    pub model_available: bool,
    pub available_models: Vec<String>,
}
