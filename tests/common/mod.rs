//! Test helpers for HTTP and mailbox integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestResponse, TestServer};
use tempfile::TempDir;

use clipper::directory::{MemoryUserDirectory, User};
use clipper::mailbox::{EntryId, MailboxService, MailboxStore};
use clipper::web::handlers::AppState;
use clipper::web::router::create_router;

/// Body limit used by test routers.
pub const TEST_UPLOAD_LIMIT: usize = 1024 * 1024;

/// A mailbox store in a temp dir, its service, and a router over both.
pub struct TestContext {
    pub temp_dir: TempDir,
    pub store: MailboxStore,
    pub service: MailboxService,
    pub server: TestServer,
}

/// Users shared by the integration tests.
///
/// Alice (1) is friends with Bob (2) and Carol (3). Dave (9) is nobody's
/// friend.
pub fn test_users() -> Vec<User> {
    vec![
        User::new(1, "Alice", "alice-pass").with_friends([2, 3]),
        User::new(2, "Bob", "bob-pass").with_friends([1]),
        User::new(3, "Carol", "carol-pass").with_friends([1]),
        User::new(9, "Dave", "dave pass/9"),
    ]
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_upload_limit(TEST_UPLOAD_LIMIT)
    }

    pub fn with_upload_limit(limit: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = MailboxStore::new(temp_dir.path()).expect("Failed to create store");
        let directory = MemoryUserDirectory::new(test_users());
        let service = MailboxService::new(store.clone(), Arc::new(directory));

        let router = create_router(Arc::new(AppState::new(service.clone())), &[], limit);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            temp_dir,
            store,
            service,
            server,
        }
    }

    /// Wait until the reveal hook has stamped an entry.
    pub async fn wait_for_reveal(&self, recipient: i64, id: &EntryId) -> bool {
        for _ in 0..100 {
            if let Ok(metadata) = self.store.read_metadata(recipient, id) {
                if metadata.is_revealed() {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// A complete upload form from Alice.
pub fn upload_form(recipients: &str, timestamp: &str, payload: &[u8]) -> MultipartForm {
    MultipartForm::new()
        .add_text("userPass", "alice-pass")
        .add_text("recipients", recipients)
        .add_text("timestamp", timestamp)
        .add_text("mediaType", "image")
        .add_part(
            "media",
            Part::bytes(payload.to_vec())
                .file_name("photo.jpg")
                .mime_type("image/jpeg"),
        )
}

/// Post an upload form.
pub async fn upload(server: &TestServer, form: MultipartForm) -> TestResponse {
    server.post("/_api/v1/upload").multipart(form).await
}
