//! Contact list handler.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::directory::Contact;
use crate::web::error::ApiError;
use crate::web::handlers::{run_blocking, AppState};

/// GET /_api/v1/contacts/:credential - List the caller's friends.
#[utoipa::path(
    get,
    path = "/contacts/{credential}",
    tag = "contacts",
    params(
        ("credential" = String, Path, description = "User password")
    ),
    responses(
        (status = 200, description = "Friends in directory order", body = Vec<Contact>),
        (status = 403, description = "Invalid user password")
    )
)]
pub async fn get_contacts(
    State(state): State<Arc<AppState>>,
    Path(credential): Path<String>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let mailbox = state.mailbox.clone();
    let contacts = run_blocking(move || mailbox.contacts(&credential)).await?;
    Ok(Json(contacts))
}
