use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::db::types::ConversionResultKind;
use crate::services::inline_images::InlineImageMaterializer;
use crate::services::providers::{
    DetailedTranscript, DocumentProvider, ProviderStatus, TranscriptProvider,
};
use crate::services::task_store::ResultCache;
use crate::tasks::polling::{Probe, ProbeOutcome};

/// Converted document HTML with images materialized.
pub(crate) struct DocumentProbe {
    pub(crate) external_ref: String,
    pub(crate) owner_scope: String,
    pub(crate) provider: Arc<dyn DocumentProvider>,
    pub(crate) cache: Arc<dyn ResultCache>,
    pub(crate) materializer: InlineImageMaterializer,
}

#[async_trait]
impl Probe for DocumentProbe {
    type Output = String;

    async fn check(&self) -> Result<ProbeOutcome<String>> {
        let kind = ConversionResultKind::DocumentHtml;
        if let Some(html) = cached(self.cache.as_ref(), &self.external_ref, kind).await? {
            return Ok(ProbeOutcome::Ready(html));
        }

        let document = match self.provider.check_document(&self.external_ref).await? {
            ProviderStatus::Pending => return Ok(ProbeOutcome::NotReady),
            ProviderStatus::Complete(document) => document,
        };

        let html =
            self.materializer.materialize(&self.owner_scope, &self.external_ref, document).await?;
        remember(self.cache.as_ref(), &self.external_ref, kind, &html).await;
        Ok(ProbeOutcome::Ready(html))
    }
}

pub(crate) struct TranscriptProbe {
    pub(crate) external_ref: String,
    pub(crate) provider: Arc<dyn TranscriptProvider>,
    pub(crate) cache: Arc<dyn ResultCache>,
}

#[async_trait]
impl Probe for TranscriptProbe {
    type Output = String;

    async fn check(&self) -> Result<ProbeOutcome<String>> {
        let kind = ConversionResultKind::TranscriptText;
        if let Some(text) = cached(self.cache.as_ref(), &self.external_ref, kind).await? {
            return Ok(ProbeOutcome::Ready(text));
        }

        match self.provider.check_text(&self.external_ref).await? {
            ProviderStatus::Pending => Ok(ProbeOutcome::NotReady),
            ProviderStatus::Complete(text) => {
                remember(self.cache.as_ref(), &self.external_ref, kind, &text).await;
                Ok(ProbeOutcome::Ready(text))
            }
        }
    }
}

/// Transcript with word timings. Cached as JSON.
pub(crate) struct DetailedTranscriptProbe {
    pub(crate) external_ref: String,
    pub(crate) provider: Arc<dyn TranscriptProvider>,
    pub(crate) cache: Arc<dyn ResultCache>,
}

#[async_trait]
impl Probe for DetailedTranscriptProbe {
    type Output = DetailedTranscript;

    async fn check(&self) -> Result<ProbeOutcome<DetailedTranscript>> {
        let kind = ConversionResultKind::TranscriptDetailed;
        if let Some(raw) = cached(self.cache.as_ref(), &self.external_ref, kind).await? {
            let transcript = serde_json::from_str::<DetailedTranscript>(&raw)
                .context("Cached detailed transcript is not valid JSON")?;
            return Ok(ProbeOutcome::Ready(transcript));
        }

        match self.provider.check_detailed(&self.external_ref).await? {
            ProviderStatus::Pending => Ok(ProbeOutcome::NotReady),
            ProviderStatus::Complete(transcript) => {
                let raw = serde_json::to_string(&transcript)
                    .context("Failed to serialize detailed transcript")?;
                remember(self.cache.as_ref(), &self.external_ref, kind, &raw).await;
                Ok(ProbeOutcome::Ready(transcript))
            }
        }
    }
}

async fn cached(
    cache: &dyn ResultCache,
    external_ref: &str,
    kind: ConversionResultKind,
) -> Result<Option<String>> {
    let hit = cache.get(external_ref, kind).await?;
    if hit.is_some() {
        metrics::counter!("conversion_cache_hits_total", "result_kind" => kind.as_str())
            .increment(1);
        tracing::debug!(external_ref, result_kind = kind.as_str(), "Answered from result cache");
    }
    Ok(hit)
}

// Best effort: a failed put is logged and the caller still gets the value.
async fn remember(
    cache: &dyn ResultCache,
    external_ref: &str,
    kind: ConversionResultKind,
    payload: &str,
) {
    if let Err(err) = cache.put(external_ref, kind, payload).await {
        tracing::warn!(
            external_ref,
            result_kind = kind.as_str(),
            error = %err,
            "Failed to cache conversion result"
        );
    }
}
