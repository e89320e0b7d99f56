//! Audio transcription via an `OpenAI`-compatible `/audio/transcriptions` endpoint

use super::{LlmError, TranscriptionService};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

pub struct OpenAITranscriber {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAITranscriber {
    pub fn new(api_key: String, base_url: &str, model: impl Into<String>) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }

    fn form(&self, file_name: &str, media_type: &str, audio: &[u8]) -> Result<Form, LlmError> {
        let part = Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str(media_type)
            .map_err(|e| LlmError::invalid_request(format!("Invalid audio media type {media_type}: {e}")))?;

        Ok(Form::new()
            .part("file", part)
            .text("model", self.model.clone()))
    }
}

#[async_trait]
impl TranscriptionService for OpenAITranscriber {
    async fn transcribe(&self, file_name: &str, media_type: &str, audio: &[u8]) -> Result<String, LlmError> {
        let start = std::time::Instant::now();
        let form = self.form(file_name, media_type, audio)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            tracing::warn!(
                model = %self.model,
                status = status.as_u16(),
                duration_ms = %start.elapsed().as_millis(),
                "Transcription failed"
            );
            return Err(LlmError::from_status(status.as_u16(), &body));
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::unknown(format!("Failed to parse transcription: {e}")))?;

        tracing::info!(
            model = %self.model,
            bytes = audio.len(),
            duration_ms = %start.elapsed().as_millis(),
            "Transcription completed"
        );

        Ok(parsed.text)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}
