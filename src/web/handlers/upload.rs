//! Upload handler.

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use std::sync::Arc;

use crate::mailbox::UploadRequest;
use crate::web::dto::UploadResponse;
use crate::web::error::ApiError;
use crate::web::handlers::{run_blocking, AppState};

/// Map a multipart read failure, keeping the body-limit status.
fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::warn!("Upload rejected: {}", e);
        return ApiError::payload_too_large("Upload exceeds the size limit");
    }
    tracing::warn!("Failed to read multipart field: {}", e);
    ApiError::bad_request("Unable to parse form")
}

/// POST /_api/v1/upload - Send one media file to several friends.
///
/// Multipart fields: `media` (file), `userPass`, `recipients` (JSON array of
/// user IDs), `timestamp`, `mediaType` and optional `textOverlays` (JSON
/// array).
#[utoipa::path(
    post,
    path = "/upload",
    tag = "mailbox",
    responses(
        (status = 200, description = "Fan-out attempted", body = UploadResponse),
        (status = 400, description = "Missing or malformed field, or no valid recipients"),
        (status = 403, description = "Invalid user password"),
        (status = 413, description = "Upload exceeds the size limit")
    )
)]
pub async fn upload_media(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut media: Option<Bytes> = None;
    let mut request = UploadRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "media" => {
                request.file_name = field.file_name().map(|s| s.to_string());
                media = Some(field.bytes().await.map_err(multipart_error)?);
            }
            "userPass" => request.credential = field.text().await.map_err(multipart_error)?,
            "recipients" => request.recipients = field.text().await.map_err(multipart_error)?,
            "timestamp" => request.timestamp = field.text().await.map_err(multipart_error)?,
            "mediaType" => {
                request.media_type = Some(field.text().await.map_err(multipart_error)?);
            }
            "textOverlays" => {
                request.text_overlays = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    request.payload = media.ok_or_else(|| {
        tracing::warn!("Upload without a media part");
        ApiError::bad_request("Unable to get media file")
    })?;

    let service = state.mailbox.clone();
    let report = run_blocking(move || service.upload(request)).await?;

    tracing::info!(
        entry = %report.entry_id,
        delivered = ?report.delivered,
        failed = ?report.failed,
        rejected = ?report.rejected,
        "Media fanned out"
    );

    Ok(Json(UploadResponse::uploaded()))
}
