use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::services::datalab::DatalabService;
use crate::services::storage::StorageService;
use crate::services::transcription::SpeechService;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    storage: Option<StorageService>,
    datalab: DatalabService,
    speech: SpeechService,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        storage: Option<StorageService>,
    ) -> anyhow::Result<Self> {
        let datalab = DatalabService::from_settings(&settings)?;
        let speech = SpeechService::from_settings(&settings)?;
        Ok(Self {
            inner: Arc::new(InnerState { settings, db, redis, storage, datalab, speech }),
        })
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn storage(&self) -> Option<&StorageService> {
        self.inner.storage.as_ref()
    }

    pub(crate) fn datalab(&self) -> &DatalabService {
        &self.inner.datalab
    }

    pub(crate) fn speech(&self) -> &SpeechService {
        &self.inner.speech
    }
}
