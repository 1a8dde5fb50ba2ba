//! Router configuration for the HTTP API.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::Request,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{
    download_entry, get_contacts, get_mailbox, health_check, missing_credential,
    missing_filename, upload_media, AppState,
};
use super::middleware::{create_cors_layer, no_store_headers};
use super::openapi::openapi_json;

/// Prefix of every API route.
pub const API_PREFIX: &str = "/_api/v1";

/// Create the main API router.
///
/// Request bodies above `max_upload_bytes` are rejected with 413.
pub fn create_router(
    app_state: Arc<AppState>,
    cors_origins: &[String],
    max_upload_bytes: usize,
) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/contacts", get(missing_credential))
        .route("/contacts/:credential", get(get_contacts))
        .route("/upload", post(upload_media))
        .route("/mailbox", get(missing_credential))
        .route("/mailbox/:credential", get(get_mailbox))
        .route("/download", get(missing_credential))
        .route("/download/:credential", get(missing_filename))
        .route("/download/:credential/:entry_id", get(download_entry))
        .route("/openapi.json", get(openapi_json));

    Router::new()
        .nest(API_PREFIX, api_routes)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                // Log the route template; the path itself carries credentials
                .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                    let route = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(MatchedPath::as_str)
                        .unwrap_or("<unmatched>");
                    tracing::info_span!("http_request", method = %req.method(), route)
                }))
                .layer(create_cors_layer(cors_origins))
                .layer(middleware::from_fn(no_store_headers)),
        )
        .with_state(app_state)
}
