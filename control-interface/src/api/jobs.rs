//! Split submission, status, queue position, and cancellation endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use job_types::{
    Dimensions, HoleSpec, JobRecord, JobState, QueuePosition, SplitJobPayload, SplitResult,
};
use printsplit_worker::queue::queue_position;

use super::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub file_id: String,
    pub file_name: Option<String>,
    pub dimensions: Dimensions,
    #[serde(default)]
    pub smart_boundaries: Option<bool>,
    #[serde(default)]
    pub balanced_cutting: Option<bool>,
    #[serde(default)]
    pub alignment_holes: Option<HoleSpec>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SplitResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            state: record.state,
            progress: record.progress,
            progress_message: record.progress_message,
            result: record.result,
            error: record.error,
        }
    }
}

/// `POST /api/process`: validates the request and enqueues a split job.
pub async fn start_split(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let file_name = request
        .file_name
        .clone()
        .or_else(|| {
            request
                .file_id
                .rsplit('/')
                .next()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "model.stl".to_string());

    let mut payload = SplitJobPayload::new(request.file_id, file_name, request.dimensions);
    payload.smart_boundaries = request.smart_boundaries.unwrap_or(false);
    payload.balanced_cutting = request.balanced_cutting.unwrap_or(false);
    payload.alignment_holes = request.alignment_holes.unwrap_or_default();

    payload
        .validate()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    if !state
        .store
        .exists(&state.config.store.upload_bucket, &payload.file_id)
        .await?
    {
        return Err(ApiError::not_found("Uploaded file not found"));
    }

    let job_id = payload.job_id;
    state.broker.enqueue(JobRecord::new(payload)).await?;
    info!(%job_id, "split job queued");
    Ok(Json(ProcessResponse { job_id }))
}

/// `GET /api/jobs/:id`: state, progress, and outcome.
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let record = state
        .broker
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(record.into()))
}

/// `GET /api/jobs/:id/position`: queue rank and wait estimate.
pub async fn get_position(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueuePosition>, ApiError> {
    let position = queue_position(state.broker.as_ref(), id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(position))
}

/// `DELETE /api/jobs/:id`: removes a waiting job, cancels an active one
/// cooperatively.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .broker
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    match record.state {
        JobState::Waiting => {
            state.broker.remove_waiting(id).await?;
            info!(job_id = %id, "waiting job removed");
            Ok(Json(json!({ "status": "removed" })))
        }
        JobState::Active => {
            state.broker.set_cancelled(id).await?;
            info!(job_id = %id, "cancellation requested");
            Ok(Json(json!({ "status": "cancelling" })))
        }
        JobState::Completed | JobState::Failed => {
            Err(ApiError::conflict("Job already finished"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use job_types::config::{RuntimeConfig, StoreConfig};
    use printsplit_splitter::{stl_codec, Solid};
    use printsplit_worker::storage::STL_CONTENT_TYPE;
    use printsplit_worker::{JobBroker, MemoryBroker, MemoryStore, ObjectStore, SplitWorker};

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            redis_url: "redis://unused".to_string(),
            store: StoreConfig {
                endpoint: "unused".to_string(),
                port: 9000,
                access_key: String::new(),
                secret_key: String::new(),
                use_ssl: false,
                upload_bucket: "uploads".to_string(),
                results_bucket: "results".to_string(),
            },
            worker_concurrency: 2,
            max_file_size: 150 * 1024 * 1024,
            admin_password: None,
            job_retention_hours: 48,
            allowed_origins: Vec::new(),
            rate_limit_enabled: false,
        }
    }

    async fn state_with_upload(file_id: &str) -> AppState {
        let broker: Arc<dyn JobBroker> = Arc::new(MemoryBroker::new());
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let model = stl_codec::encode(&Solid::cube([120.0, 60.0, 40.0]).export_mesh());
        store
            .put("uploads", file_id, model, STL_CONTENT_TYPE)
            .await
            .unwrap();
        AppState::new(broker, store, test_config())
    }

    fn process_request(file_id: &str) -> ProcessRequest {
        ProcessRequest {
            file_id: file_id.to_string(),
            file_name: Some("model.stl".to_string()),
            dimensions: Dimensions::new(60.0, 100.0, 100.0),
            smart_boundaries: None,
            balanced_cutting: None,
            alignment_holes: None,
        }
    }

    #[tokio::test]
    async fn test_submit_process_and_run_to_completion() {
        let state = state_with_upload("u1/model.stl").await;

        let Json(submitted) = start_split(
            State(state.clone()),
            Json(process_request("u1/model.stl")),
        )
        .await
        .unwrap();

        // Submitted job is waiting at the head of the queue.
        let Json(position) = get_position(State(state.clone()), Path(submitted.job_id))
            .await
            .unwrap();
        assert_eq!(position.state, JobState::Waiting);
        assert_eq!(position.position, 1);
        assert_eq!(position.total_waiting, 1);

        // Drive one job through an inline worker.
        let worker = SplitWorker::new(
            Arc::clone(&state.broker),
            Arc::clone(&state.store),
            (*state.config).clone(),
        );
        let record = state
            .broker
            .fetch_next(Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        worker.process_job(record).await;

        let Json(status) = get_status(State(state.clone()), Path(submitted.job_id))
            .await
            .unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, 100);
        let result = status.result.unwrap();
        assert_eq!(result.sections, [2, 1, 1]);
        assert_eq!(result.total_parts, 2);

        // The parts and bundle are downloadable from the results bucket.
        for part in &result.parts {
            assert!(state.store.exists("results", &part.key).await.unwrap());
        }
        assert!(state.store.exists("results", &result.zip_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_process_rejects_bad_dimensions() {
        let state = state_with_upload("u2/model.stl").await;
        let mut request = process_request("u2/model.stl");
        request.dimensions = Dimensions::new(0.0, 100.0, 100.0);

        let err = start_split(State(state), Json(request)).await.unwrap_err();
        let response = axum::response::IntoResponse::into_response(err);
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_process_requires_existing_upload() {
        let state = state_with_upload("u3/model.stl").await;
        let err = start_split(State(state), Json(process_request("nope/missing.stl")))
            .await
            .unwrap_err();
        let response = axum::response::IntoResponse::into_response(err);
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_waiting_job_removes_it() {
        let state = state_with_upload("u4/model.stl").await;
        let Json(submitted) = start_split(
            State(state.clone()),
            Json(process_request("u4/model.stl")),
        )
        .await
        .unwrap();

        let Json(body) = cancel_job(State(state.clone()), Path(submitted.job_id))
            .await
            .unwrap();
        assert_eq!(body["status"], "removed");

        let err = get_status(State(state), Path(submitted.job_id))
            .await
            .unwrap_err();
        let response = axum::response::IntoResponse::into_response(err);
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_active_job_converges_to_failed() {
        let state = state_with_upload("u5/model.stl").await;
        let Json(submitted) = start_split(
            State(state.clone()),
            Json(process_request("u5/model.stl")),
        )
        .await
        .unwrap();

        let record = state
            .broker
            .fetch_next(Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let Json(body) = cancel_job(State(state.clone()), Path(submitted.job_id))
            .await
            .unwrap();
        assert_eq!(body["status"], "cancelling");

        let worker = SplitWorker::new(
            Arc::clone(&state.broker),
            Arc::clone(&state.store),
            (*state.config).clone(),
        );
        worker.process_job(record).await;

        let Json(status) = get_status(State(state), Path(submitted.job_id))
            .await
            .unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("Job was cancelled"));
    }
}
