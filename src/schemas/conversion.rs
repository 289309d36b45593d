use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::ConversionTask;
use crate::db::types::{ConversionJobKind, ConversionTaskStatus};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct DocumentConversionCreate {
    #[serde(alias = "fileUrl")]
    #[validate(url(message = "file_url must be a valid URL"))]
    pub(crate) file_url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AudioConversionCreate {
    #[serde(alias = "audioUrl")]
    #[validate(url(message = "audio_url must be a valid URL"))]
    pub(crate) audio_url: String,
    /// Word-level timings instead of plain text.
    #[serde(default)]
    pub(crate) detailed: bool,
}

/// Tracks a job that was already submitted to a provider.
#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ConversionTrackRequest {
    #[serde(alias = "jobKind")]
    pub(crate) job_kind: ConversionJobKind,
    #[serde(alias = "externalRef")]
    #[validate(length(min = 1, max = 255, message = "external_ref must be 1-255 characters"))]
    pub(crate) external_ref: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConversionTaskResponse {
    pub(crate) id: String,
    pub(crate) job_kind: ConversionJobKind,
    pub(crate) external_ref: String,
    pub(crate) status: ConversionTaskStatus,
    pub(crate) status_message: String,
    pub(crate) attempts_made: i32,
    pub(crate) result_payload: Option<String>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl ConversionTaskResponse {
    pub(crate) fn from_db(task: ConversionTask) -> Self {
        Self {
            id: task.id,
            job_kind: task.job_kind,
            external_ref: task.external_ref,
            status: task.status,
            status_message: task.status_message,
            attempts_made: task.attempts_made,
            result_payload: task.result_payload,
            created_at: format_primitive(task.created_at),
            updated_at: format_primitive(task.updated_at),
        }
    }
}
