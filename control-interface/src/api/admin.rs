//! Admin endpoints: force-fail, queue cleaning, worker restart.
//!
//! All of them require the `x-admin-password` header to match
//! `ADMIN_PASSWORD`; with no password configured the surface is disabled.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use job_types::JobState;
use printsplit_worker::queue::QueuePolicy;
use printsplit_worker::worker::signal_restart;

use super::ApiError;
use crate::AppState;

const ADMIN_HEADER: &str = "x-admin-password";

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.admin_password.as_deref() else {
        return Err(ApiError::forbidden("Admin interface is disabled"));
    };
    let provided = headers
        .get(ADMIN_HEADER)
        .and_then(|value| value.to_str().ok());
    if provided != Some(expected) {
        return Err(ApiError::unauthorized("Invalid admin credentials"));
    }
    Ok(())
}

/// `POST /api/admin/jobs/:id/fail`: moves an unfinished job to failed
/// immediately, without waiting for cooperation.
pub async fn force_fail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;

    let record = state
        .broker
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    if record.state.is_terminal() {
        return Err(ApiError::conflict("Job already finished"));
    }

    let retention = QueuePolicy::split()
        .with_retention_hours(state.config.job_retention_hours)
        .failed_retention;
    state
        .broker
        .fail(id, "Force-failed by admin", retention)
        .await?;
    warn!(job_id = %id, "job force-failed by admin");
    Ok(Json(json!({ "status": "failed" })))
}

/// `POST /api/admin/clean/:state`: drops every job in the given state.
pub async fn clean_state(
    State(state): State<AppState>,
    Path(raw_state): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;

    let target = match raw_state.as_str() {
        "waiting" => JobState::Waiting,
        "active" => JobState::Active,
        "completed" => JobState::Completed,
        "failed" => JobState::Failed,
        other => {
            return Err(ApiError::bad_request(format!(
                "Unknown job state {:?}",
                other
            )))
        }
    };

    let removed = state.broker.clean_state(target).await?;
    warn!(state = raw_state, removed, "queue cleaned by admin");
    Ok(Json(json!({ "removed": removed })))
}

/// `POST /api/admin/worker/restart`: sets the restart signal every worker
/// polls; each exits 0 within its poll interval.
pub async fn restart_worker(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;
    signal_restart(state.broker.as_ref()).await?;
    warn!("worker restart requested by admin");
    Ok(Json(json!({ "status": "restarting" })))
}
