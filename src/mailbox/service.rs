//! Mailbox operations on behalf of authenticated users.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{error, warn};

use super::store::MailboxStore;
use super::types::{EntryId, EntryMetadata, TextOverlays};
use crate::directory::{Contact, User, UserDirectory, UserId};
use crate::{ClipperError, Result};

/// Raw form values of an upload, validated by [`MailboxService::upload`].
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Sender credential.
    pub credential: String,
    /// JSON array of recipient IDs.
    pub recipients: String,
    /// Decimal integer logical timestamp.
    pub timestamp: String,
    /// Media type label.
    pub media_type: Option<String>,
    /// JSON array of overlays.
    pub text_overlays: Option<String>,
    /// Filename of the uploaded part, used for the ID extension.
    pub file_name: Option<String>,
    /// Media bytes.
    pub payload: Bytes,
}

/// Per-recipient outcome of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// ID shared by every copy.
    pub entry_id: EntryId,
    /// Recipients that received a copy.
    pub delivered: Vec<UserId>,
    /// Recipients whose copy could not be written.
    pub failed: Vec<UserId>,
    /// Requested recipients that are not friends of the sender.
    pub rejected: Vec<UserId>,
}

/// A visible entry in a mailbox listing.
#[derive(Debug, Clone, PartialEq)]
pub struct MailboxItem {
    pub entry_id: EntryId,
    pub metadata: EntryMetadata,
}

/// An entry opened for download.
#[derive(Debug, Clone)]
pub struct Download {
    /// Owner of the mailbox the entry lives in.
    pub recipient: UserId,
    pub entry_id: EntryId,
    pub payload: Bytes,
    /// Reveal time as of opening; `None` means this download may reveal it.
    pub revealed_at: Option<DateTime<Utc>>,
}

/// Result of stamping the reveal time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    /// This call set the reveal time.
    Revealed(DateTime<Utc>),
    /// Another download got there first; the stored time is unchanged.
    AlreadyRevealed(DateTime<Utc>),
    /// The entry was deleted in the meantime.
    Gone,
}

/// Mailbox service: authentication, fan-out, listing and reveal.
#[derive(Clone)]
pub struct MailboxService {
    store: MailboxStore,
    directory: Arc<dyn UserDirectory>,
}

impl MailboxService {
    /// Create a new MailboxService.
    pub fn new(store: MailboxStore, directory: Arc<dyn UserDirectory>) -> Self {
        Self { store, directory }
    }

    /// The underlying store.
    pub fn store(&self) -> &MailboxStore {
        &self.store
    }

    /// Resolve a credential to its user.
    pub fn authenticate(&self, credential: &str) -> Result<User> {
        self.directory.authenticate(credential)
    }

    /// Friends of the credential's owner.
    pub fn contacts(&self, credential: &str) -> Result<Vec<Contact>> {
        let user = self.authenticate(credential)?;
        self.directory.contacts_of(&user)
    }

    /// Validate an upload and write one copy per valid recipient.
    ///
    /// Non-friend recipients are dropped. Copies that fail to write are
    /// reported in [`DeliveryReport::failed`] and do not fail the upload.
    pub fn upload(&self, request: UploadRequest) -> Result<DeliveryReport> {
        let sender = self.authenticate(&request.credential)?;

        let requested = parse_recipients(&request.recipients)?;
        let (valid, rejected) = partition_recipients(&sender, &requested);
        for recipient in &rejected {
            warn!(sender = sender.id, recipient, "dropping recipient who is not a friend");
        }
        if valid.is_empty() {
            return Err(ClipperError::BadRequest("no valid recipients".to_string()));
        }

        let created_at = parse_timestamp(&request.timestamp)?;
        let media_type = request
            .media_type
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ClipperError::BadRequest("mediaType is required".to_string()))?;
        let text_overlays = match request.text_overlays.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(TextOverlays::parse(raw)?),
            _ => None,
        };

        let mut metadata = EntryMetadata::new(Some(created_at), sender.id, media_type, requested);
        if let Some(overlays) = text_overlays {
            metadata = metadata.with_text_overlays(overlays);
        }

        let entry_id = EntryId::generate(request.file_name.as_deref());
        let mut report = DeliveryReport {
            entry_id: entry_id.clone(),
            delivered: Vec::with_capacity(valid.len()),
            failed: Vec::new(),
            rejected,
        };

        for recipient in valid {
            match self.store.put(recipient, &entry_id, &request.payload, &metadata) {
                Ok(()) => report.delivered.push(recipient),
                Err(e) => {
                    error!(entry = %entry_id, recipient, error = %e, "failed to deliver copy");
                    report.failed.push(recipient);
                }
            }
        }

        Ok(report)
    }

    /// Visible entries in the credential owner's mailbox, newest first.
    ///
    /// Entries with unreadable metadata are skipped.
    pub fn mailbox(&self, credential: &str) -> Result<Vec<MailboxItem>> {
        let user = self.authenticate(credential)?;

        let mut items = Vec::new();
        for entry_id in self.store.list(user.id)? {
            match self.store.read_metadata(user.id, &entry_id) {
                Ok(metadata) => items.push(MailboxItem { entry_id, metadata }),
                // Removed since listing
                Err(ClipperError::NotFound(_)) => {}
                Err(e) => {
                    warn!(recipient = user.id, entry = %entry_id, error = %e, "skipping unreadable entry");
                }
            }
        }

        sort_newest_first(&mut items);
        Ok(items)
    }

    /// Open an entry in the credential owner's mailbox.
    ///
    /// Does not reveal it; see [`MailboxService::reveal`].
    pub fn open(&self, credential: &str, entry_id: &str) -> Result<Download> {
        let user = self.authenticate(credential)?;
        let entry_id = EntryId::parse(entry_id)
            .ok_or_else(|| ClipperError::NotFound(format!("entry {entry_id}")))?;

        let metadata = self.store.read_metadata(user.id, &entry_id)?;
        let payload = self.store.read_payload(user.id, &entry_id)?;

        Ok(Download {
            recipient: user.id,
            entry_id,
            payload: Bytes::from(payload),
            revealed_at: metadata.revealed_at,
        })
    }

    /// Record the first complete download of an entry.
    ///
    /// Never overwrites an existing reveal time and never recreates a
    /// deleted entry.
    pub fn reveal(
        &self,
        recipient: UserId,
        entry_id: &EntryId,
        at: DateTime<Utc>,
    ) -> Result<RevealOutcome> {
        let mut stamped = false;
        let updated = self.store.update_metadata(recipient, entry_id, |metadata| {
            stamped = metadata.mark_revealed(at);
            stamped
        })?;

        Ok(match updated.and_then(|m| m.revealed_at) {
            Some(revealed_at) if stamped => RevealOutcome::Revealed(revealed_at),
            Some(revealed_at) => RevealOutcome::AlreadyRevealed(revealed_at),
            None => RevealOutcome::Gone,
        })
    }
}

fn parse_recipients(raw: &str) -> Result<Vec<UserId>> {
    serde_json::from_str(raw)
        .map_err(|_| ClipperError::BadRequest("invalid recipients format".to_string()))
}

fn parse_timestamp(raw: &str) -> Result<i64> {
    raw.trim()
        .parse()
        .map_err(|_| ClipperError::BadRequest("invalid timestamp format".to_string()))
}

/// Split requested recipients into friends and non-friends, deduplicated,
/// keeping first-seen order.
fn partition_recipients(sender: &User, requested: &[UserId]) -> (Vec<UserId>, Vec<UserId>) {
    let mut seen = HashSet::new();
    let mut valid = Vec::new();
    let mut rejected = Vec::new();

    for &recipient in requested {
        if !seen.insert(recipient) {
            continue;
        }
        if sender.is_friend(recipient) {
            valid.push(recipient);
        } else {
            rejected.push(recipient);
        }
    }

    (valid, rejected)
}

/// Sort by creation time descending; entries without one sort last.
/// Ties keep their existing order.
fn sort_newest_first(items: &mut [MailboxItem]) {
    items.sort_by(|a, b| b.metadata.created_at.cmp(&a.metadata.created_at));
}
