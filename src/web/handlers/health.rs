//! Liveness probe.

use axum::Json;

use crate::web::dto::HealthResponse;

/// GET /_api/v1/health - Report that the process is up.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is running", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
