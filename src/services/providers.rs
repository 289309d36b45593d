use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Completion state reported by an external provider for one job.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ProviderStatus<T> {
    Pending,
    Complete(T),
}

/// Converted document as returned by the provider, images still inline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DocumentConversion {
    pub(crate) content: String,
    /// File name referenced from `content` -> base64 image bytes.
    pub(crate) images: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DetailedTranscript {
    pub(crate) text: String,
    pub(crate) confidence: Option<f64>,
    pub(crate) audio_duration_seconds: Option<f64>,
    pub(crate) language_code: Option<String>,
    pub(crate) words: Vec<TranscriptWord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TranscriptWord {
    pub(crate) text: String,
    pub(crate) start_ms: u64,
    pub(crate) end_ms: u64,
    pub(crate) confidence: Option<f64>,
    pub(crate) speaker: Option<String>,
}

/// One status query per call; never waits for completion.
#[async_trait]
pub(crate) trait DocumentProvider: Send + Sync {
    async fn check_document(
        &self,
        external_ref: &str,
    ) -> anyhow::Result<ProviderStatus<DocumentConversion>>;
}

#[async_trait]
pub(crate) trait TranscriptProvider: Send + Sync {
    async fn check_text(&self, external_ref: &str) -> anyhow::Result<ProviderStatus<String>>;

    async fn check_detailed(
        &self,
        external_ref: &str,
    ) -> anyhow::Result<ProviderStatus<DetailedTranscript>>;
}
