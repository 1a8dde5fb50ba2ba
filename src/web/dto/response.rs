//! Response DTOs for the HTTP API.

use serde::Serialize;
use utoipa::ToSchema;

use crate::mailbox::{MailboxItem, TextOverlays};

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: String,
}

impl HealthResponse {
    /// The healthy response.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Upload acknowledgement.
///
/// Returned once validation passed and fan-out finished, even if some
/// copies failed to write.
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
}

impl UploadResponse {
    pub fn uploaded() -> Self {
        Self {
            success: true,
            message: "File uploaded successfully".to_string(),
        }
    }
}

/// One entry of a mailbox listing.
///
/// The recipient list is never exposed.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MailboxItemResponse {
    /// Client-supplied logical timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Sender's user ID.
    pub user_id: i64,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub text_overlays: Option<TextOverlays>,
    /// First download time in Unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_downloaded_at: Option<i64>,
    /// Relative URL that downloads the payload.
    pub file_url: String,
}

impl MailboxItemResponse {
    /// Build the response for `item`, linking to `file_url`.
    pub fn new(item: MailboxItem, file_url: String) -> Self {
        let metadata = item.metadata;
        Self {
            timestamp: metadata.created_at,
            user_id: metadata.sender_id,
            media_type: metadata.media_type,
            text_overlays: metadata.text_overlays,
            first_downloaded_at: metadata.revealed_at.map(|t| t.timestamp_millis()),
            file_url,
        }
    }
}
