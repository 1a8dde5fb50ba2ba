//! Per-recipient mailboxes of self-destructing media.
//!
//! - `types`: entry IDs and metadata
//! - `store`: on-disk pairs of payload and metadata files
//! - `service`: upload fan-out, listing, download and reveal
//! - `reaper`: background deletion after the retention window

mod reaper;
mod service;
mod store;
mod types;

pub use reaper::{ExpiryReaper, ScanReport};
pub use service::{
    DeliveryReport, Download, MailboxItem, MailboxService, RevealOutcome, UploadRequest,
};
pub use store::{MailboxInventory, MailboxStore, MAILBOXES_DIR, TEMP_SUFFIX};
pub use types::{
    EntryId, EntryMetadata, TextOverlays, MAX_ENTRY_ID_LENGTH, MAX_EXTENSION_LENGTH,
    METADATA_SUFFIX,
};
