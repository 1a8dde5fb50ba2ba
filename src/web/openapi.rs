//! OpenAPI document for the HTTP API.

use axum::Json;
use utoipa::OpenApi;

use super::dto::{HealthResponse, MailboxItemResponse, UploadResponse};
use super::handlers;
use crate::directory::Contact;

#[derive(OpenApi)]
#[openapi(
    info(title = "Clipper API", description = "Ephemeral media relay"),
    servers((url = "/_api/v1")),
    paths(
        handlers::health::health_check,
        handlers::contacts::get_contacts,
        handlers::upload::upload_media,
        handlers::mailbox::get_mailbox,
        handlers::download::download_entry,
    ),
    components(schemas(HealthResponse, UploadResponse, MailboxItemResponse, Contact)),
    tags(
        (name = "health", description = "Liveness"),
        (name = "contacts", description = "Friend lists"),
        (name = "mailbox", description = "Upload, listing and download"),
    )
)]
pub struct ApiDoc;

/// GET /_api/v1/openapi.json - Serve the OpenAPI document.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
