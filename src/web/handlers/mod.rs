//! API handlers for the Clipper HTTP API.

pub mod contacts;
pub mod download;
pub mod health;
pub mod mailbox;
pub mod upload;

pub use contacts::*;
pub use download::*;
pub use health::*;
pub use mailbox::*;
pub use upload::*;

use crate::mailbox::MailboxService;
use crate::web::error::ApiError;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    /// Mailbox operations.
    pub mailbox: MailboxService,
}

impl AppState {
    /// Create a new application state.
    pub fn new(mailbox: MailboxService) -> Self {
        Self { mailbox }
    }
}

/// Fallback for routes whose credential segment is missing.
pub async fn missing_credential() -> ApiError {
    ApiError::bad_request("User password is required")
}

/// Fallback for download routes without an entry ID.
pub async fn missing_filename() -> ApiError {
    ApiError::bad_request("Filename is required")
}

/// Run blocking mailbox work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(task: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| {
            tracing::error!("Blocking task failed: {}", e);
            ApiError::internal("An internal error occurred")
        })?
        .map_err(ApiError::from)
}
