//! # REST API Handlers
//!
//! The endpoints the browser client drives the system through.
//!
//! ## API Structure
//!
//! - **files**: upload and part/bundle download (/api/upload, /api/download)
//! - **jobs**: split submission, status, queue position, cancellation
//!   (/api/process, /api/jobs)
//! - **admin**: force-fail, queue cleaning, worker restart (/api/admin)
//!
//! Validation failures map to 4xx with a JSON `{error}` body; infrastructure
//! failures map to 5xx the same way.

pub mod admin;
pub mod files;
pub mod jobs;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use printsplit_worker::{QueueError, StoreError};

use crate::AppState;

/// Creates the complete API router with all endpoints.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/api/upload", post(files::upload_file))
        .route("/api/process", post(jobs::start_split))
        .route("/api/jobs/:id", get(jobs::get_status))
        .route("/api/jobs/:id", delete(jobs::cancel_job))
        .route("/api/jobs/:id/position", get(jobs::get_position))
        .route("/api/download/:job_id/all", get(files::download_bundle))
        .route("/api/download/:job_id/:part_name", get(files::download_part))
        .route("/api/admin/jobs/:id/fail", post(admin::force_fail))
        .route("/api/admin/clean/:state", post(admin::clean_state))
        .route("/api/admin/worker/restart", post(admin::restart_worker))
}

/// Error payload every handler funnels through.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::internal(format!("queue error: {}", err))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::not_found("Object not found"),
            other => ApiError::internal(format!("storage error: {}", other)),
        }
    }
}
