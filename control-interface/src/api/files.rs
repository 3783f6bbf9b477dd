//! Upload and download endpoints.

use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use printsplit_worker::storage::{STL_CONTENT_TYPE, ZIP_CONTENT_TYPE};

use super::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: String,
    pub file_name: String,
    pub size: u64,
}

/// `POST /api/upload`: multipart upload of a single STL model.
///
/// The stored key is `{uuid}/{original_name}`, which becomes the `fileId`
/// the client passes to `/api/process`.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("malformed upload: {}", err)))?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let file_name = sanitize_file_name(&raw_name);
        if !file_name.to_ascii_lowercase().ends_with(".stl") {
            return Err(ApiError::bad_request("Only STL files are supported"));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(format!("upload read failed: {}", err)))?;
        if bytes.len() as u64 > state.config.max_file_size {
            return Err(ApiError::payload_too_large(format!(
                "File exceeds the {} byte upload limit",
                state.config.max_file_size
            )));
        }

        let file_id = format!("{}/{}", Uuid::new_v4(), file_name);
        let size = bytes.len() as u64;
        state
            .store
            .put(
                &state.config.store.upload_bucket,
                &file_id,
                bytes.to_vec(),
                STL_CONTENT_TYPE,
            )
            .await?;
        info!(file_id = %file_id, size, "model uploaded");

        return Ok(Json(UploadResponse {
            file_id,
            file_name,
            size,
        }));
    }

    Err(ApiError::bad_request("No file field in upload"))
}

/// `GET /api/download/:job_id/all`: the bundle archive.
pub async fn download_bundle(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let key = format!("{}/all-parts.zip", job_id);
    let bytes = state
        .store
        .get(&state.config.store.results_bucket, &key)
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, ZIP_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"all-parts.zip\"".to_string(),
            ),
        ],
        bytes,
    ))
}

/// `GET /api/download/:job_id/:part_name`: one part file.
pub async fn download_part(
    State(state): State<AppState>,
    Path((job_id, part_name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_part_name(&part_name) {
        return Err(ApiError::bad_request("Invalid part name"));
    }
    let key = format!("{}/{}", job_id, part_name);
    let bytes = state
        .store
        .get(&state.config.store.results_bucket, &key)
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, STL_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", part_name),
            ),
        ],
        bytes,
    ))
}

/// Basename only; uploads cannot smuggle path components into keys.
fn sanitize_file_name(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim()
        .to_string();
    if base.is_empty() {
        "model.stl".to_string()
    } else {
        base
    }
}

/// Part names are exactly what the engine emits.
fn is_valid_part_name(name: &str) -> bool {
    let Some(stem) = name
        .strip_prefix("part_")
        .and_then(|rest| rest.strip_suffix(".stl"))
    else {
        return false;
    };
    let mut sections = 0;
    for token in stem.split('_') {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        sections += 1;
    }
    sections == 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name_strips_paths() {
        assert_eq!(sanitize_file_name("model.stl"), "model.stl");
        assert_eq!(sanitize_file_name("/tmp/evil/model.stl"), "model.stl");
        assert_eq!(sanitize_file_name("C:\\evil\\model.stl"), "model.stl");
        assert_eq!(sanitize_file_name("  "), "model.stl");
    }

    #[test]
    fn test_part_name_validation() {
        assert!(is_valid_part_name("part_1_1_1.stl"));
        assert!(is_valid_part_name("part_12_3_4.stl"));
        assert!(!is_valid_part_name("part_1_1.stl"));
        assert!(!is_valid_part_name("part_1_1_x.stl"));
        assert!(!is_valid_part_name("../secret"));
        assert!(!is_valid_part_name("part_1_1_1.zip"));
    }
}
