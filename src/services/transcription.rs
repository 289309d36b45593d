use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::config::Settings;
use crate::services::providers::{
    DetailedTranscript, ProviderStatus, TranscriptProvider, TranscriptWord,
};

/// Speech-to-text provider client (`/transcript` style API).
#[derive(Debug, Clone)]
pub(crate) struct SpeechService {
    client: Client,
    api_key: String,
    base_url: String,
    language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: Option<String>,
    status: Option<String>,
    text: Option<String>,
    confidence: Option<f64>,
    audio_duration: Option<f64>,
    language_code: Option<String>,
    #[serde(default)]
    words: Vec<WordResponse>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WordResponse {
    text: String,
    start: u64,
    end: u64,
    confidence: Option<f64>,
    speaker: Option<String>,
}

impl SpeechService {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(settings.speech().timeout_seconds))
            .build()
            .context("Failed to build speech HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.speech().api_key.clone(),
            base_url: settings.speech().base_url.trim_end_matches('/').to_string(),
            language_code: settings.speech().language_code.clone(),
        })
    }

    /// Queues `audio_url` for transcription and returns the transcript id.
    pub(crate) async fn submit_audio(&self, audio_url: &str) -> Result<String> {
        let mut body = json!({ "audio_url": audio_url });
        if let Some(language_code) = &self.language_code {
            body["language_code"] = Value::String(language_code.clone());
        }

        let response = self
            .client
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to call speech transcript API")?;

        let status = response.status();
        let raw_body = response.text().await.context("Failed to read speech submit response")?;
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "Speech transcript submit failed (status {status}): {raw_body}"
            ));
        }

        let parsed: TranscriptResponse = serde_json::from_str(&raw_body)
            .with_context(|| format!("Speech submit returned unexpected body: {raw_body}"))?;
        let transcript_id = parsed
            .id
            .filter(|id| !id.is_empty())
            .context("Speech submit response missing transcript id")?;

        tracing::info!(transcript_id, "Speech transcription submitted");
        Ok(transcript_id)
    }

    async fn fetch(&self, transcript_id: &str) -> Result<ProviderStatus<TranscriptResponse>> {
        let response = self
            .client
            .get(format!("{}/transcript/{}", self.base_url, transcript_id))
            .header("authorization", &self.api_key)
            .send()
            .await
            .context("Failed to call speech transcript status endpoint")?;

        let status = response.status();
        let raw_body = response.text().await.context("Failed to read speech poll response")?;
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "Speech transcript poll failed (status {status}): {raw_body}"
            ));
        }

        let parsed: TranscriptResponse = serde_json::from_str(&raw_body)
            .with_context(|| format!("Speech poll returned unexpected body: {raw_body}"))?;
        transcript_status(transcript_id, parsed)
    }
}

#[async_trait]
impl TranscriptProvider for SpeechService {
    async fn check_text(&self, transcript_id: &str) -> Result<ProviderStatus<String>> {
        Ok(match self.fetch(transcript_id).await? {
            ProviderStatus::Pending => ProviderStatus::Pending,
            ProviderStatus::Complete(response) => {
                ProviderStatus::Complete(response.text.unwrap_or_default())
            }
        })
    }

    async fn check_detailed(
        &self,
        transcript_id: &str,
    ) -> Result<ProviderStatus<DetailedTranscript>> {
        Ok(match self.fetch(transcript_id).await? {
            ProviderStatus::Pending => ProviderStatus::Pending,
            ProviderStatus::Complete(response) => {
                ProviderStatus::Complete(detailed_transcript(response))
            }
        })
    }
}

fn transcript_status(
    transcript_id: &str,
    response: TranscriptResponse,
) -> Result<ProviderStatus<TranscriptResponse>> {
    let status = response.status.as_deref().unwrap_or("unknown").to_ascii_lowercase();
    match status.as_str() {
        "completed" => Ok(ProviderStatus::Complete(response)),
        "error" => Err(anyhow::anyhow!(
            "Transcription {} failed: {}",
            transcript_id,
            response.error.as_deref().unwrap_or("unknown_error")
        )),
        _ => Ok(ProviderStatus::Pending),
    }
}

fn detailed_transcript(response: TranscriptResponse) -> DetailedTranscript {
    DetailedTranscript {
        text: response.text.unwrap_or_default(),
        confidence: response.confidence,
        audio_duration_seconds: response.audio_duration,
        language_code: response.language_code,
        words: response
            .words
            .into_iter()
            .map(|word| TranscriptWord {
                text: word.text,
                start_ms: word.start,
                end_ms: word.end,
                confidence: word.confidence,
                speaker: word.speaker,
            })
            .collect(),
    }
}
