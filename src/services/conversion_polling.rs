use std::sync::Arc;

use crate::core::config::PollingSettings;
use crate::db::models::ConversionTask;
use crate::db::types::ConversionJobKind;
use crate::services::conversion_probes::{
    DetailedTranscriptProbe, DocumentProbe, TranscriptProbe,
};
use crate::services::conversion_progress::TaskProgressReporter;
use crate::services::inline_images::InlineImageMaterializer;
use crate::services::providers::{DetailedTranscript, DocumentProvider, TranscriptProvider};
use crate::services::task_store::{ResultCache, TaskStore};
use crate::tasks::polling::{PollHandle, PollPolicy, PollerPool, Probe};

/// Starts polls for conversion tasks. Attempt limits and delays come from
/// configuration, one policy per job kind.
#[derive(Clone)]
pub(crate) struct ConversionPoller {
    pool: PollerPool,
    store: Arc<dyn TaskStore>,
    cache: Arc<dyn ResultCache>,
    documents: Arc<dyn DocumentProvider>,
    transcripts: Arc<dyn TranscriptProvider>,
    materializer: InlineImageMaterializer,
    polling: PollingSettings,
}

pub(crate) struct ConversionPollerParts {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) cache: Arc<dyn ResultCache>,
    pub(crate) documents: Arc<dyn DocumentProvider>,
    pub(crate) transcripts: Arc<dyn TranscriptProvider>,
    pub(crate) materializer: InlineImageMaterializer,
}

impl ConversionPoller {
    pub(crate) fn new(
        pool: PollerPool,
        polling: PollingSettings,
        parts: ConversionPollerParts,
    ) -> Self {
        Self {
            pool,
            store: parts.store,
            cache: parts.cache,
            documents: parts.documents,
            transcripts: parts.transcripts,
            materializer: parts.materializer,
            polling,
        }
    }

    pub(crate) fn pool(&self) -> &PollerPool {
        &self.pool
    }

    pub(crate) fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub(crate) fn policy_for(&self, job_kind: ConversionJobKind) -> PollPolicy {
        self.polling.policy_for(job_kind)
    }

    /// Converted HTML for a `PDF_TO_QUESTIONS` task.
    pub(crate) fn poll_document_html(&self, task: &ConversionTask) -> PollHandle<String> {
        let probe = DocumentProbe {
            external_ref: task.external_ref.clone(),
            owner_scope: task.owner_scope.clone(),
            provider: self.documents.clone(),
            cache: self.cache.clone(),
            materializer: self.materializer.clone(),
        };
        self.start(task, probe)
    }

    /// Plain transcript for an `AUDIO_TO_QUESTIONS` task.
    pub(crate) fn poll_transcript(&self, task: &ConversionTask) -> PollHandle<String> {
        let probe = TranscriptProbe {
            external_ref: task.external_ref.clone(),
            provider: self.transcripts.clone(),
            cache: self.cache.clone(),
        };
        self.start(task, probe)
    }

    /// Timed transcript for an `AUDIO_TIMED_TRANSCRIPT` task.
    pub(crate) fn poll_detailed_transcript(
        &self,
        task: &ConversionTask,
    ) -> PollHandle<DetailedTranscript> {
        let probe = DetailedTranscriptProbe {
            external_ref: task.external_ref.clone(),
            provider: self.transcripts.clone(),
            cache: self.cache.clone(),
        };
        self.start(task, probe)
    }

    fn start<P: Probe>(&self, task: &ConversionTask, probe: P) -> PollHandle<P::Output> {
        let canceller = self.pool.canceller();
        let reporter = TaskProgressReporter::new(
            self.store.clone(),
            task.id.clone(),
            task.job_kind,
            canceller.clone(),
        );
        self.pool.poll_with(canceller, probe, self.policy_for(task.job_kind), reporter)
    }
}

#[cfg(test)]
mod tests {
    use std::num::{NonZeroU32, NonZeroUsize};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::db::types::{ConversionResultKind, ConversionTaskStatus};
    use crate::services::providers::{DocumentConversion, ProviderStatus};
    use crate::tasks::polling::PollError;
    use crate::test_support::{
        conversion_task, polling_settings, InMemoryResultCache, InMemoryTaskStore,
        ScriptedDocumentProvider, ScriptedTranscriptProvider,
    };

    struct Fixture {
        poller: ConversionPoller,
        store: Arc<InMemoryTaskStore>,
        documents: Arc<ScriptedDocumentProvider>,
        transcripts: Arc<ScriptedTranscriptProvider>,
    }

    fn fixture(
        documents: ScriptedDocumentProvider,
        transcripts: ScriptedTranscriptProvider,
        cache: InMemoryResultCache,
    ) -> Fixture {
        let store = Arc::new(InMemoryTaskStore::default());
        let documents = Arc::new(documents);
        let transcripts = Arc::new(transcripts);
        let poller = ConversionPoller::new(
            PollerPool::new(NonZeroUsize::new(5).expect("workers")),
            polling_settings(4, Duration::from_millis(100)),
            ConversionPollerParts {
                store: store.clone(),
                cache: Arc::new(cache),
                documents: documents.clone(),
                transcripts: transcripts.clone(),
                materializer: InlineImageMaterializer::default(),
            },
        );
        Fixture { poller, store, documents, transcripts }
    }

    fn in_progress(id: &str, job_kind: ConversionJobKind, external_ref: &str) -> ConversionTask {
        conversion_task(id, job_kind, external_ref, ConversionTaskStatus::InProgress)
    }

    #[tokio::test(start_paused = true)]
    async fn document_poll_reports_progress_and_resolves() {
        let fx = fixture(
            ScriptedDocumentProvider::new(vec![
                Ok(ProviderStatus::Pending),
                Ok(ProviderStatus::Pending),
                Ok(ProviderStatus::Complete(DocumentConversion {
                    content: "<p>ok</p>".to_string(),
                    images: Default::default(),
                })),
            ]),
            ScriptedTranscriptProvider::text(vec![]),
            InMemoryResultCache::default(),
        );
        let task = in_progress("task-1", ConversionJobKind::PdfToQuestions, "req-1");
        fx.store.insert(task.clone());

        let started = Instant::now();
        let html = fx.poller.poll_document_html(&task).await.expect("poll");

        assert_eq!(html.as_deref(), Some("<p>ok</p>"));
        assert_eq!(fx.documents.calls(), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(300));
        let stored = fx.store.task("task-1").expect("task");
        assert_eq!(stored.status_message, "Processing PDF... (attempt 3/4)");
        assert_eq!(stored.attempts_made, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transcript_poll_exhausts_to_none() {
        let fx = fixture(
            ScriptedDocumentProvider::new(vec![]),
            ScriptedTranscriptProvider::text(vec![]),
            InMemoryResultCache::default(),
        );
        let task = in_progress("task-2", ConversionJobKind::AudioToQuestions, "t-2");
        fx.store.insert(task.clone());

        let transcript = fx.poller.poll_transcript(&task).await.expect("poll");

        assert_eq!(transcript, None);
        assert_eq!(fx.transcripts.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_detailed_transcript_resolves_without_provider() {
        let cached = r#"{"text":"hi","confidence":null,"audio_duration_seconds":null,
            "language_code":null,"words":[]}"#;
        let fx = fixture(
            ScriptedDocumentProvider::new(vec![]),
            ScriptedTranscriptProvider::detailed(vec![]),
            InMemoryResultCache::default().with_entry(
                "t-3",
                ConversionResultKind::TranscriptDetailed,
                cached,
            ),
        );
        let task = in_progress("task-3", ConversionJobKind::AudioTimedTranscript, "t-3");
        fx.store.insert(task.clone());

        let transcript = fx.poller.poll_detailed_transcript(&task).await.expect("poll");

        assert_eq!(transcript.map(|t| t.text).as_deref(), Some("hi"));
        assert_eq!(fx.transcripts.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failure_surfaces_as_probe_error() {
        let fx = fixture(
            ScriptedDocumentProvider::new(vec![
                Ok(ProviderStatus::Pending),
                Err(anyhow::anyhow!("marker failed")),
            ]),
            ScriptedTranscriptProvider::text(vec![]),
            InMemoryResultCache::default(),
        );
        let task = in_progress("task-4", ConversionJobKind::PdfToQuestions, "req-4");
        fx.store.insert(task.clone());

        let err = fx.poller.poll_document_html(&task).await.unwrap_err();

        assert!(matches!(err, PollError::Probe(_)));
        assert_eq!(fx.documents.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stops_once_task_leaves_in_progress() {
        let fx = fixture(
            ScriptedDocumentProvider::new(vec![]),
            ScriptedTranscriptProvider::text(vec![]),
            InMemoryResultCache::default(),
        );
        let task = conversion_task(
            "task-5",
            ConversionJobKind::AudioToQuestions,
            "t-5",
            ConversionTaskStatus::Init,
        );
        fx.store.insert(task.clone());

        let err = fx.poller.poll_transcript(&task).await.unwrap_err();

        assert!(matches!(err, PollError::Cancelled), "got {err:?}");
        assert_eq!(fx.transcripts.calls(), 0);
    }

    #[test]
    fn policies_follow_job_kind() {
        let fx = fixture(
            ScriptedDocumentProvider::new(vec![]),
            ScriptedTranscriptProvider::text(vec![]),
            InMemoryResultCache::default(),
        );
        let policy = fx.poller.policy_for(ConversionJobKind::AudioTimedTranscript);
        assert_eq!(
            policy,
            PollPolicy::new(NonZeroU32::new(4).expect("attempts"), Duration::from_millis(100))
        );
    }
}
