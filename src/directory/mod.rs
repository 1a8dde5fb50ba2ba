//! User directory for Clipper.
//!
//! Maps a bearer credential to a user and that user's friend set. The
//! directory is read-only from the relay's point of view.

mod user;

pub use user::{Contact, JsonUserDirectory, MemoryUserDirectory, User, UserDirectory, UserId};
