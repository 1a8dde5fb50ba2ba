//! Download handler and the body that reveals an entry once fully sent.

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::directory::UserId;
use crate::mailbox::{EntryId, MailboxService, RevealOutcome};
use crate::web::error::ApiError;
use crate::web::handlers::{run_blocking, AppState};

/// Size of the chunks handed to the transport.
pub const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Content-Disposition value for an entry. Entry IDs are plain ASCII.
fn content_disposition_header(entry_id: &EntryId) -> String {
    format!("attachment; filename=\"{}\"", entry_id)
}

/// Stamps the reveal time of one entry.
struct RevealHook {
    service: MailboxService,
    recipient: UserId,
    entry_id: EntryId,
}

impl RevealHook {
    fn fire(self) {
        tokio::task::spawn_blocking(move || {
            match self.service.reveal(self.recipient, &self.entry_id, Utc::now()) {
                Ok(RevealOutcome::Revealed(at)) => tracing::info!(
                    recipient = self.recipient,
                    entry = %self.entry_id,
                    revealed_at = %at.to_rfc3339(),
                    "Entry revealed"
                ),
                Ok(RevealOutcome::AlreadyRevealed(_)) => {}
                Ok(RevealOutcome::Gone) => tracing::debug!(
                    "Entry {}/{} deleted before reveal",
                    self.recipient,
                    self.entry_id
                ),
                Err(e) => tracing::error!(
                    "Failed to reveal entry {}/{}: {}",
                    self.recipient,
                    self.entry_id,
                    e
                ),
            }
        });
    }
}

/// Payload stream that fires its reveal hook when the last chunk goes out.
///
/// Dropping the stream early (client disconnect, HEAD request) never
/// reveals the entry.
pub struct RevealingBody {
    remaining: Bytes,
    hook: Option<RevealHook>,
}

impl RevealingBody {
    fn new(payload: Bytes, hook: Option<RevealHook>) -> Self {
        Self {
            remaining: payload,
            hook,
        }
    }

    fn fire_hook(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook.fire();
        }
    }
}

impl Stream for RevealingBody {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.remaining.is_empty() {
            this.fire_hook();
            return Poll::Ready(None);
        }

        let len = this.remaining.len().min(DOWNLOAD_CHUNK_SIZE);
        let chunk = this.remaining.split_to(len);
        // With a Content-Length, hyper drops the body once the last byte is
        // buffered and never polls for the end of the stream
        if this.remaining.is_empty() {
            this.fire_hook();
        }

        Poll::Ready(Some(Ok(chunk)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunks = self.remaining.len().div_ceil(DOWNLOAD_CHUNK_SIZE);
        (chunks, Some(chunks))
    }
}

impl Drop for RevealingBody {
    fn drop(&mut self) {
        if let Some(hook) = &self.hook {
            tracing::debug!(
                "Download of {}/{} ended early, not revealed",
                hook.recipient,
                hook.entry_id
            );
        }
    }
}

/// GET /_api/v1/download/:credential/:entry_id - Download an entry.
///
/// The first complete download starts the entry's retention window.
#[utoipa::path(
    get,
    path = "/download/{credential}/{entry_id}",
    tag = "mailbox",
    params(
        ("credential" = String, Path, description = "User password"),
        ("entry_id" = String, Path, description = "Entry ID from the mailbox listing")
    ),
    responses(
        (status = 200, description = "Media bytes", content_type = "application/octet-stream"),
        (status = 403, description = "Invalid user password"),
        (status = 404, description = "File not found")
    )
)]
pub async fn download_entry(
    State(state): State<Arc<AppState>>,
    Path((credential, entry_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let service = state.mailbox.clone();
    let download = run_blocking(move || service.open(&credential, &entry_id)).await?;

    let hook = download.revealed_at.is_none().then(|| RevealHook {
        service: state.mailbox.clone(),
        recipient: download.recipient,
        entry_id: download.entry_id.clone(),
    });
    let content_length = download.payload.len();
    let body = RevealingBody::new(download.payload, hook);

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, content_length)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header(&download.entry_id),
        )
        .body(Body::from_stream(body))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            ApiError::internal("Failed to build response")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryUserDirectory, User};
    use crate::mailbox::{EntryMetadata, MailboxStore};
    use futures::StreamExt;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, MailboxService, EntryId) {
        let temp_dir = TempDir::new().unwrap();
        let store = MailboxStore::new(temp_dir.path()).unwrap();
        let id = EntryId::generate(Some("clip.mp4"));
        store
            .put(2, &id, b"unused", &EntryMetadata::new(Some(1), 1, "video", vec![2]))
            .unwrap();
        let directory = MemoryUserDirectory::new(vec![User::new(2, "Bob", "bob-pass")]);
        let service = MailboxService::new(store, Arc::new(directory));
        (temp_dir, service, id)
    }

    fn hook(service: &MailboxService, entry_id: &EntryId) -> RevealHook {
        RevealHook {
            service: service.clone(),
            recipient: 2,
            entry_id: entry_id.clone(),
        }
    }

    async fn wait_for_reveal(service: &MailboxService, id: &EntryId) -> bool {
        for _ in 0..100 {
            if service.store().read_metadata(2, id).unwrap().is_revealed() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_content_disposition_header() {
        let id = EntryId::parse("1718000000123456789.jpg").unwrap();
        assert_eq!(
            content_disposition_header(&id),
            "attachment; filename=\"1718000000123456789.jpg\""
        );
    }

    #[tokio::test]
    async fn test_body_chunks_and_reveals_after_last_chunk() {
        let (_temp, service, id) = setup();
        let payload = Bytes::from(vec![7u8; DOWNLOAD_CHUNK_SIZE * 2 + 10]);
        let mut body = RevealingBody::new(payload.clone(), Some(hook(&service, &id)));

        assert_eq!(body.size_hint(), (3, Some(3)));

        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first.len(), DOWNLOAD_CHUNK_SIZE);
        let second = body.next().await.unwrap().unwrap();
        assert_eq!(second.len(), DOWNLOAD_CHUNK_SIZE);
        assert!(body.hook.is_some());

        let last = body.next().await.unwrap().unwrap();
        assert_eq!(last.len(), 10);
        assert!(body.hook.is_none());
        assert!(body.next().await.is_none());

        assert!(wait_for_reveal(&service, &id).await);
    }

    #[tokio::test]
    async fn test_empty_body_reveals() {
        let (_temp, service, id) = setup();
        let mut body = RevealingBody::new(Bytes::new(), Some(hook(&service, &id)));

        assert!(body.next().await.is_none());
        assert!(wait_for_reveal(&service, &id).await);
    }

    #[tokio::test]
    async fn test_dropped_body_does_not_reveal() {
        let (_temp, service, id) = setup();
        let payload = Bytes::from(vec![1u8; DOWNLOAD_CHUNK_SIZE + 1]);
        let mut body = RevealingBody::new(payload, Some(hook(&service, &id)));

        body.next().await.unwrap().unwrap();
        drop(body);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!service.store().read_metadata(2, &id).unwrap().is_revealed());
    }
}
