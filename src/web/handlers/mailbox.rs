//! Mailbox listing handler.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::mailbox::EntryId;
use crate::web::dto::MailboxItemResponse;
use crate::web::error::ApiError;
use crate::web::handlers::{run_blocking, AppState};
use crate::web::router::API_PREFIX;

/// Relative URL that downloads `entry_id` with `credential`.
pub fn file_url(credential: &str, entry_id: &EntryId) -> String {
    format!(
        "{API_PREFIX}/download/{}/{}",
        urlencoding::encode(credential),
        entry_id
    )
}

/// GET /_api/v1/mailbox/:credential - List the caller's entries, newest first.
#[utoipa::path(
    get,
    path = "/mailbox/{credential}",
    tag = "mailbox",
    params(
        ("credential" = String, Path, description = "User password")
    ),
    responses(
        (status = 200, description = "Visible entries, newest first", body = Vec<MailboxItemResponse>),
        (status = 403, description = "Invalid user password")
    )
)]
pub async fn get_mailbox(
    State(state): State<Arc<AppState>>,
    Path(credential): Path<String>,
) -> Result<Json<Vec<MailboxItemResponse>>, ApiError> {
    let items = {
        let mailbox = state.mailbox.clone();
        let credential = credential.clone();
        run_blocking(move || mailbox.mailbox(&credential)).await?
    };

    let response = items
        .into_iter()
        .map(|item| {
            let url = file_url(&credential, &item.entry_id);
            MailboxItemResponse::new(item, url)
        })
        .collect();

    Ok(Json(response))
}
