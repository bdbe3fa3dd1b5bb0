use std::path::Path;

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use tracing::{error, info};
use uuid::Uuid;

use chatter_types::api::UploadResponse;

use crate::auth::AppState;
use crate::error::ApiError;

/// Longest client-supplied extension carried over to the stored name.
const MAX_EXTENSION_LEN: usize = 16;

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

/// Server-side name for an upload: a random hex id plus the client's
/// extension when it is short and alphanumeric. Nothing else from the
/// client name reaches the filesystem.
fn stored_name(original: Option<&str>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let ext = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        });

    match ext {
        Some(ext) => format!("{}.{}", id, ext),
        None => id,
    }
}

/// POST /upload. Multipart form with a `file` field. Returns the stored
/// file name.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = stored_name(field.file_name());
        let bytes = field.bytes().await.map_err(multipart_error)?;

        tokio::fs::create_dir_all(&state.upload_dir).await.map_err(|e| {
            error!("Failed to create upload directory {}: {}", state.upload_dir.display(), e);
            ApiError::Internal(e.into())
        })?;

        let path = state.upload_dir.join(&filename);
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            error!("Failed to write upload {}: {}", path.display(), e);
            ApiError::Internal(e.into())
        })?;

        info!("Stored upload {} ({} bytes)", filename, bytes.len());
        return Ok(Json(UploadResponse { filename }));
    }

    Err(ApiError::BadRequest("Missing 'file' field".into()))
}
