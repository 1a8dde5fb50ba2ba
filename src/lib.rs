//! Clipper - an ephemeral media relay.
//!
//! Users send a media file to several friends at once. Each recipient gets a
//! private copy in their mailbox; a copy is deleted a fixed time after its
//! first complete download.

pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod web;

pub use config::Config;
pub use directory::{Contact, JsonUserDirectory, User, UserDirectory, UserId};
pub use error::{ClipperError, Result};
pub use mailbox::{EntryId, EntryMetadata, ExpiryReaper, MailboxService, MailboxStore};
pub use web::WebServer;
