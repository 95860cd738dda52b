//! Route handlers.

use axum::extract::{Path, State};
use axum::Json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use localtrack_store::{decode_metadata, encode_metadata, JobWithMedia, NewJob};

use crate::error::{ApiError, ApiResult};
use crate::names::generate_job_name;
use crate::state::AppState;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub model: Option<String>,
    pub video: Option<String>,
    pub metadata: Option<Value>,
    pub args: Option<String>,
    pub email: Option<String>,
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": format!("localtrack {}", env!("CARGO_PKG_VERSION")) }))
}

/// Healthy only when models are discoverable and the store answers.
/// Refreshes the catalog as a side effect so a stale listing never reports
/// healthy.
pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let catalog = state.models.fetch().await.unwrap_or_default();
    if catalog.is_empty() {
        return Err(ApiError::unavailable("no models available"));
    }
    if state.store.ping().await.is_err() {
        return Err(ApiError::unavailable("database offline"));
    }
    Ok(Json(json!({ "message": "OK" })))
}

pub async fn models(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let catalog = state.models.fetch().await?;
    Ok(Json(json!({ "model": catalog.names() })))
}

/// Admission: validate against the catalog and the video URL, then insert a
/// QUEUED job. All status transitions after this point belong to the
/// scheduler.
pub async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictRequest>,
) -> ApiResult<Json<Value>> {
    let catalog = state.models.fetch().await?;

    let model_name = match request.model.or_else(|| catalog.default_model().map(String::from)) {
        Some(name) => name,
        None => return Err(ApiError::not_found("default model")),
    };
    let model_uri = catalog
        .uri(&model_name)
        .ok_or_else(|| ApiError::not_found(&model_name))?
        .to_string();

    let video = match request.video.or_else(|| state.defaults.video_url.clone()) {
        Some(video) => video,
        None => return Err(ApiError::not_found("default video")),
    };
    if !state.probe.is_available(&video).await {
        return Err(ApiError::not_found(&video));
    }

    let mut metadata = match request.metadata {
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::Null) | None => json!({}),
        Some(other) => {
            return Err(ApiError::invalid(format!(
                "metadata must be a JSON object, got {other}"
            )))
        }
    };
    if let Some(email) = request.email {
        if !EMAIL_RE.is_match(&email) {
            return Err(ApiError::invalid(format!("{email} is not a valid email address")));
        }
        metadata["email"] = Value::String(email);
    }

    let job_name = generate_job_name(&model_name, &video);
    let job = state
        .store
        .insert_job(NewJob {
            name: job_name,
            engine: state.engine.clone(),
            model: model_uri,
            args: request.args.or_else(|| Some(state.defaults.args.clone())),
            metadata_b64: Some(encode_metadata(&metadata)?),
            videos: vec![video.clone()],
        })
        .await?;

    info!("Queued job {} '{}' for {}", job.job.id, job.job.name, video);
    Ok(Json(json!({
        "message": format!("{video} queued for processing"),
        "job_id": job.job.id,
        "job_name": job.job.name,
    })))
}

pub async fn status_by_id(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let job = state
        .store
        .job_by_id(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(&format!("job {job_id}")))?;
    Ok(Json(job_detail(&job)?))
}

pub async fn status_by_name(
    State(state): State<Arc<AppState>>,
    Path(job_name): Path<String>,
) -> ApiResult<Json<Value>> {
    let job = state
        .store
        .job_by_name(&job_name)
        .await?
        .ok_or_else(|| ApiError::not_found(&format!("job {job_name}")))?;
    Ok(Json(job_detail(&job)?))
}

pub async fn status_all(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let jobs = state.store.list_jobs().await?;
    let summaries: Vec<Value> = jobs
        .iter()
        .map(|job| {
            json!({
                "id": job.job.id,
                "name": job.job.name,
                "status": job.status(),
            })
        })
        .collect();
    Ok(Json(json!({ "jobs": summaries })))
}

/// Status payload: identity, derived status, and (when present) the result
/// enrichment the scheduler merged into the media metadata.
fn job_detail(job: &JobWithMedia) -> ApiResult<Value> {
    let media = job.media.first();
    let metadata = decode_metadata(job.job.metadata_b64.as_deref()).unwrap_or_else(|err| {
        warn!("Job {} has undecodable metadata: {err:#}", job.job.id);
        json!({})
    });
    let media_metadata = media
        .map(|m| decode_metadata(m.metadata_b64.as_deref()))
        .transpose()?
        .unwrap_or_else(|| json!({}));

    Ok(json!({
        "status": job.status(),
        "last_updated": media.map(|m| m.updated_at.to_rfc3339()),
        "created_at": job.job.created_at.to_rfc3339(),
        "name": job.job.name,
        "job_id": job.job.id,
        "video": media.map(|m| m.name.clone()),
        "model": job.job.model,
        "args": job.job.args,
        "metadata": metadata,
        "processing_time_secs": media_metadata.get("processing_time_secs").cloned().unwrap_or(Value::Null),
        "num_tracks": media_metadata.get("num_tracks").cloned().unwrap_or(Value::Null),
        "s3_path": media_metadata.get("s3_path").cloned().unwrap_or(Value::Null),
    }))
}
