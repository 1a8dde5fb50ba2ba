//! HTTP API for Clipper.
//!
//! Every route lives under `/_api/v1`. Credentials travel in the URL path
//! (contacts, mailbox, download) or in the upload form.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use router::{create_router, API_PREFIX};
pub use server::WebServer;
