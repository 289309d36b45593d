use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::OwnerScope;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::ConversionTask;
use crate::db::types::ConversionJobKind;
use crate::repositories;
use crate::schemas::conversion::{
    AudioConversionCreate, ConversionTaskResponse, ConversionTrackRequest,
    DocumentConversionCreate,
};

const QUEUED_MESSAGE: &str = "Queued for polling";

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(track_conversion))
        .route("/documents", post(create_document_conversion))
        .route("/audio", post(create_audio_conversion))
        .route("/:task_id", get(get_conversion))
        .route("/:task_id/resubmit", post(resubmit_conversion))
}

async fn create_document_conversion(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Json(payload): Json<DocumentConversionCreate>,
) -> Result<(StatusCode, Json<ConversionTaskResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let request_id = state.datalab().submit_document(&payload.file_url).await.map_err(|e| {
        tracing::error!(error = %format!("{e:#}"), "Document conversion submit failed");
        ApiError::ServiceUnavailable("Document conversion provider is unavailable".to_string())
    })?;

    let task =
        create_task(&state, &owner, ConversionJobKind::PdfToQuestions, &request_id).await?;
    Ok((StatusCode::CREATED, Json(ConversionTaskResponse::from_db(task))))
}

async fn create_audio_conversion(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Json(payload): Json<AudioConversionCreate>,
) -> Result<(StatusCode, Json<ConversionTaskResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let transcript_id = state.speech().submit_audio(&payload.audio_url).await.map_err(|e| {
        tracing::error!(error = %format!("{e:#}"), "Audio transcription submit failed");
        ApiError::ServiceUnavailable("Speech provider is unavailable".to_string())
    })?;

    let job_kind = if payload.detailed {
        ConversionJobKind::AudioTimedTranscript
    } else {
        ConversionJobKind::AudioToQuestions
    };
    let task = create_task(&state, &owner, job_kind, &transcript_id).await?;
    Ok((StatusCode::CREATED, Json(ConversionTaskResponse::from_db(task))))
}

/// Registers an already-submitted provider job. A live record for the same
/// job is returned instead of creating a second poller for it.
async fn track_conversion(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Json(payload): Json<ConversionTrackRequest>,
) -> Result<(StatusCode, Json<ConversionTaskResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let external_ref = payload.external_ref.trim();
    if external_ref.is_empty() {
        return Err(ApiError::BadRequest("external_ref must not be blank".to_string()));
    }

    let existing = repositories::conversion_tasks::find_live_by_external_ref(
        state.db(),
        &owner,
        payload.job_kind,
        external_ref,
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to look up conversion task"))?;

    if let Some(task) = existing {
        return Ok((StatusCode::OK, Json(ConversionTaskResponse::from_db(task))));
    }

    let task = create_task(&state, &owner, payload.job_kind, external_ref).await?;
    Ok((StatusCode::CREATED, Json(ConversionTaskResponse::from_db(task))))
}

async fn get_conversion(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ConversionTaskResponse>, ApiError> {
    let task = repositories::conversion_tasks::find_by_id_for_owner(state.db(), &owner, &task_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load conversion task"))?
        .ok_or_else(|| ApiError::NotFound("Conversion task not found".to_string()))?;

    Ok(Json(ConversionTaskResponse::from_db(task)))
}

async fn resubmit_conversion(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ConversionTaskResponse>, ApiError> {
    let task = repositories::conversion_tasks::find_by_id_for_owner(state.db(), &owner, &task_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load conversion task"))?
        .ok_or_else(|| ApiError::NotFound("Conversion task not found".to_string()))?;

    if !task.status.is_terminal() {
        return Err(ApiError::Conflict("Conversion task is still being polled".to_string()));
    }

    let task =
        repositories::conversion_tasks::resubmit(state.db(), &owner, &task_id, primitive_now_utc())
            .await
            .map_err(|e| ApiError::internal(e, "Failed to resubmit conversion task"))?
            .ok_or_else(|| {
                ApiError::Conflict("Conversion task is still being polled".to_string())
            })?;

    tracing::info!(
        task_id = %task.id,
        job_kind = task.job_kind.as_str(),
        "Conversion resubmitted"
    );
    Ok(Json(ConversionTaskResponse::from_db(task)))
}

async fn create_task(
    state: &AppState,
    owner: &str,
    job_kind: ConversionJobKind,
    external_ref: &str,
) -> Result<ConversionTask, ApiError> {
    let task = repositories::conversion_tasks::create(
        state.db(),
        repositories::conversion_tasks::NewConversionTask {
            id: &Uuid::new_v4().to_string(),
            job_kind,
            external_ref,
            owner_scope: owner,
            status_message: QUEUED_MESSAGE,
        },
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create conversion task"))?;

    tracing::info!(
        task_id = %task.id,
        job_kind = job_kind.as_str(),
        external_ref,
        "Conversion task queued"
    );
    Ok(task)
}
