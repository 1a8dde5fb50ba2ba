//! Mailbox entry types for Clipper.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::directory::UserId;
use crate::{ClipperError, Result};

/// Maximum length for an entry ID.
pub const MAX_ENTRY_ID_LENGTH: usize = 128;

/// Longest file extension carried over from the uploaded filename.
pub const MAX_EXTENSION_LENGTH: usize = 10;

/// Suffix of metadata files; payloads never end with it.
pub const METADATA_SUFFIX: &str = ".json";

/// Highest creation time (Unix nanoseconds) handed out so far.
static LAST_ISSUED_NANOS: AtomicI64 = AtomicI64::new(0);

/// Identifier of a mailbox entry, also used as the payload file name.
///
/// Generated IDs are the server creation time in Unix nanoseconds, optionally
/// followed by the uploaded file's extension (`1718000000123456789.jpg`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Generate a new ID for an upload event.
    ///
    /// IDs issued by this process are strictly increasing, so two uploads in
    /// the same nanosecond still get distinct IDs.
    pub fn generate(original_name: Option<&str>) -> Self {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let nanos = next_creation_nanos(now);

        match original_name.and_then(extension_of) {
            Some(ext) => Self(format!("{nanos}.{ext}")),
            None => Self(nanos.to_string()),
        }
    }

    /// Parse an ID received from a client.
    ///
    /// Returns `None` for anything that could escape the mailbox directory or
    /// collide with metadata and temp file names.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = !s.is_empty()
            && s.len() <= MAX_ENTRY_ID_LENGTH
            && !s.starts_with('.')
            && !s.contains("..")
            && !s.to_ascii_lowercase().ends_with(METADATA_SUFFIX)
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));

        valid.then(|| Self(s.to_string()))
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this entry's metadata.
    pub fn metadata_file_name(&self) -> String {
        format!("{}{}", self.0, METADATA_SUFFIX)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn next_creation_nanos(now: i64) -> i64 {
    let bump = |last: i64| now.max(last.saturating_add(1));
    match LAST_ISSUED_NANOS.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
        Some(bump(last))
    }) {
        Ok(last) | Err(last) => bump(last),
    }
}

/// Extension of `name` if it is short, alphanumeric and not `json`.
fn extension_of(name: &str) -> Option<&str> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty()
                && e.len() <= MAX_EXTENSION_LENGTH
                && e.chars().all(|c| c.is_ascii_alphanumeric())
                && !e.eq_ignore_ascii_case("json")
        })
}

/// Client-supplied overlay data, stored and returned byte-for-byte.
///
/// Only checked to be a JSON array; its elements are never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextOverlays(Box<RawValue>);

impl TextOverlays {
    /// Parse overlays from the raw form value.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Box<RawValue> = serde_json::from_str(raw)
            .map_err(|_| ClipperError::BadRequest("invalid text overlays format".to_string()))?;
        if !value.get().starts_with('[') {
            return Err(ClipperError::BadRequest(
                "text overlays must be a JSON array".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// The overlays as JSON text.
    pub fn as_json(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for TextOverlays {
    fn eq(&self, other: &Self) -> bool {
        self.as_json() == other.as_json()
    }
}

/// Metadata stored next to each payload.
///
/// Serialized field names match the JSON files written by earlier server
/// versions, so existing mailboxes stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Client-supplied logical timestamp.
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Uploader's user ID.
    #[serde(rename = "userId")]
    pub sender_id: UserId,
    /// Client-supplied media type label.
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    /// Optional overlay data.
    #[serde(rename = "textOverlays", default, skip_serializing_if = "Option::is_none")]
    pub text_overlays: Option<TextOverlays>,
    /// Every recipient the sender addressed, including rejected ones.
    #[serde(default)]
    pub recipients: Vec<UserId>,
    /// When the recipient first finished downloading the payload.
    #[serde(
        rename = "firstDownloadedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub revealed_at: Option<DateTime<Utc>>,
}

impl EntryMetadata {
    /// Create metadata for a new, unrevealed entry.
    pub fn new(
        created_at: Option<i64>,
        sender_id: UserId,
        media_type: impl Into<String>,
        recipients: Vec<UserId>,
    ) -> Self {
        Self {
            created_at,
            sender_id,
            media_type: media_type.into(),
            text_overlays: None,
            recipients,
            revealed_at: None,
        }
    }

    /// Attach overlay data.
    pub fn with_text_overlays(mut self, overlays: TextOverlays) -> Self {
        self.text_overlays = Some(overlays);
        self
    }

    /// Whether the entry has been downloaded.
    pub fn is_revealed(&self) -> bool {
        self.revealed_at.is_some()
    }

    /// Stamp the reveal time unless one is already set.
    ///
    /// Returns `true` if the stamp was applied.
    pub fn mark_revealed(&mut self, at: DateTime<Utc>) -> bool {
        if self.revealed_at.is_some() {
            return false;
        }
        self.revealed_at = Some(at);
        true
    }

    /// Time left before the entry becomes eligible for deletion.
    ///
    /// `None` for unrevealed entries, which never expire. Zero once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>, retention: Duration) -> Option<Duration> {
        let revealed_at = self.revealed_at?;
        let age = now.signed_duration_since(revealed_at).to_std().unwrap_or_default();
        Some(retention.saturating_sub(age))
    }

    /// Whether `now - revealed_at >= retention`.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.time_until_expiry(now, retention)
            .is_some_and(|remaining| remaining.is_zero())
    }
}
