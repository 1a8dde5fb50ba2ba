//! Background expiry of revealed entries.
//!
//! An entry is deleted once `retention` has passed since its first download.
//! Entries that were never downloaded are kept indefinitely. Each scan also
//! sweeps debris left by interrupted writes and deletes.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::store::MailboxStore;
use super::types::EntryId;
use crate::config::ReaperConfig;
use crate::directory::UserId;
use crate::ClipperError;

/// Counters from one reaper scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Mailboxes visited.
    pub mailboxes: usize,
    /// Complete entries examined.
    pub checked: usize,
    /// Expired entries deleted.
    pub deleted: usize,
    /// Revealed entries still inside the retention window.
    pub pending: usize,
    /// Entries not yet downloaded.
    pub unrevealed: usize,
    /// Orphaned metadata, stale payloads and temp files removed.
    pub debris_removed: usize,
    /// Failures that were logged and skipped.
    pub errors: usize,
}

/// Periodic expiry scanner over a [`MailboxStore`].
#[derive(Debug, Clone)]
pub struct ExpiryReaper {
    store: MailboxStore,
    retention: Duration,
    interval: Duration,
}

impl ExpiryReaper {
    /// Create a new ExpiryReaper.
    pub fn new(store: MailboxStore, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Create a reaper from the `[reaper]` configuration section.
    pub fn from_config(store: MailboxStore, config: &ReaperConfig) -> Self {
        Self::new(store, config.retention(), config.scan_interval())
    }

    /// Retention window after first download.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Pause between scans.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one scan as of `now`.
    ///
    /// Per-entry failures are logged and counted, never propagated.
    pub fn scan(&self, now: DateTime<Utc>) -> ScanReport {
        let mut report = ScanReport::default();

        let mailboxes = match self.store.mailboxes() {
            Ok(mailboxes) => mailboxes,
            Err(e) => {
                error!("Failed to list mailboxes: {}", e);
                report.errors += 1;
                return report;
            }
        };

        for recipient in mailboxes {
            report.mailboxes += 1;
            self.scan_mailbox(recipient, now, &mut report);
        }

        report
    }

    fn scan_mailbox(&self, recipient: UserId, now: DateTime<Utc>, report: &mut ScanReport) {
        let inventory = match self.store.inventory(recipient) {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!("Failed to read mailbox {}: {}", recipient, e);
                report.errors += 1;
                return;
            }
        };

        for entry_id in inventory.complete() {
            report.checked += 1;
            self.check_entry(recipient, &entry_id, now, report);
        }

        // Only stale metadata is swept; a fresh one may belong to a put whose
        // payload the inventory missed
        for entry_id in inventory.orphaned_metadata() {
            let path = self.store.metadata_path(recipient, &entry_id);
            if !self.is_stale(&path, now) {
                continue;
            }
            match self.store.remove_orphaned_metadata(recipient, &entry_id) {
                Ok(true) => {
                    debug!("Removed orphaned metadata {}/{}", recipient, entry_id);
                    report.debris_removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to remove orphaned metadata {}/{}: {}", recipient, entry_id, e);
                    report.errors += 1;
                }
            }
        }

        // Payloads without metadata may belong to an upload in progress
        for entry_id in inventory.unpaired_payloads() {
            let path = self.store.payload_path(recipient, &entry_id);
            if !self.is_stale(&path, now) {
                continue;
            }
            match self.store.remove_unpaired_payload(recipient, &entry_id) {
                Ok(true) => {
                    debug!("Removed unpaired payload {}/{}", recipient, entry_id);
                    report.debris_removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to remove unpaired payload {}/{}: {}", recipient, entry_id, e);
                    report.errors += 1;
                }
            }
        }

        for path in &inventory.temp_files {
            if self.is_stale(path, now) {
                match self.store.remove_temp_file(path) {
                    Ok(_) => report.debris_removed += 1,
                    Err(e) => {
                        warn!("Failed to remove temp file {}: {}", path.display(), e);
                        report.errors += 1;
                    }
                }
            }
        }
    }

    fn check_entry(
        &self,
        recipient: UserId,
        entry_id: &EntryId,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) {
        let metadata = match self.store.read_metadata(recipient, entry_id) {
            Ok(metadata) => metadata,
            // Deleted since the inventory was taken
            Err(ClipperError::NotFound(_)) => return,
            Err(e) => {
                warn!("Failed to read metadata for {}/{}: {}", recipient, entry_id, e);
                report.errors += 1;
                return;
            }
        };

        let (Some(revealed_at), Some(remaining)) = (
            metadata.revealed_at,
            metadata.time_until_expiry(now, self.retention),
        ) else {
            report.unrevealed += 1;
            return;
        };

        if !remaining.is_zero() {
            debug!(
                "Entry {}/{} pending deletion in {} seconds",
                recipient,
                entry_id,
                remaining.as_secs()
            );
            report.pending += 1;
            return;
        }

        let size = self.store.payload_len(recipient, entry_id).unwrap_or_default();
        match self.store.delete(recipient, entry_id) {
            Ok(_) => {
                info!(
                    recipient,
                    entry = %entry_id,
                    sender = metadata.sender_id,
                    media_type = %metadata.media_type,
                    size,
                    revealed_at = %revealed_at.to_rfc3339(),
                    "Deleted expired entry"
                );
                report.deleted += 1;
            }
            Err(e) => {
                error!("Failed to delete expired entry {}/{}: {}", recipient, entry_id, e);
                report.errors += 1;
            }
        }
    }

    /// Whether a debris file is older than the retention window.
    fn is_stale(&self, path: &Path, now: DateTime<Utc>) -> bool {
        match self.store.modified_at(path) {
            Ok(modified) => now
                .signed_duration_since(modified)
                .to_std()
                .is_ok_and(|age| age >= self.retention),
            Err(_) => false,
        }
    }

    /// Run scans until `shutdown` is cancelled.
    ///
    /// The first scan starts immediately. Scans run on the blocking pool; a
    /// scan in progress is allowed to finish before the loop exits.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Expiry reaper started (retention: {} seconds, interval: {} seconds)",
            self.retention.as_secs(),
            self.interval.as_secs()
        );

        loop {
            let reaper = self.clone();
            match tokio::task::spawn_blocking(move || reaper.scan(Utc::now())).await {
                Ok(report) if report.deleted > 0 || report.errors > 0 => {
                    info!(
                        "Expiry scan: {} deleted, {} pending, {} unrevealed, {} debris removed, {} errors",
                        report.deleted,
                        report.pending,
                        report.unrevealed,
                        report.debris_removed,
                        report.errors
                    );
                }
                Ok(report) => {
                    debug!(
                        "Expiry scan: {} entries checked in {} mailboxes",
                        report.checked, report.mailboxes
                    );
                }
                Err(e) => error!("Expiry scan task failed: {}", e),
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Expiry reaper stopped");
    }

    /// Spawn [`ExpiryReaper::run`] on the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::types::EntryMetadata;
    use std::fs;
    use tempfile::TempDir;

    const RETENTION: Duration = Duration::from_secs(600);

    fn setup() -> (TempDir, MailboxStore, ExpiryReaper) {
        let temp_dir = TempDir::new().unwrap();
        let store = MailboxStore::new(temp_dir.path()).unwrap();
        let reaper = ExpiryReaper::new(store.clone(), RETENTION, Duration::from_secs(120));
        (temp_dir, store, reaper)
    }

    fn put_entry(store: &MailboxStore, recipient: UserId, revealed_at: Option<DateTime<Utc>>) -> EntryId {
        let id = EntryId::generate(None);
        let mut metadata = EntryMetadata::new(Some(1), 1, "image", vec![recipient]);
        metadata.revealed_at = revealed_at;
        store.put(recipient, &id, b"payload", &metadata).unwrap();
        id
    }

    #[test]
    fn test_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let store = MailboxStore::new(temp_dir.path()).unwrap();
        let reaper = ExpiryReaper::from_config(store, &ReaperConfig::default());
        assert_eq!(reaper.retention(), Duration::from_secs(600));
        assert_eq!(reaper.interval(), Duration::from_secs(120));
    }

    #[test]
    fn test_scan_deletes_only_expired() {
        let (_temp, store, reaper) = setup();
        let now = Utc::now();
        let expired = put_entry(&store, 2, Some(now - chrono::Duration::seconds(601)));
        let boundary = put_entry(&store, 2, Some(now - chrono::Duration::seconds(600)));
        let fresh = put_entry(&store, 2, Some(now - chrono::Duration::seconds(60)));
        let unrevealed = put_entry(&store, 3, None);

        let report = reaper.scan(now);

        assert_eq!(report.mailboxes, 2);
        assert_eq!(report.checked, 4);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.pending, 1);
        assert_eq!(report.unrevealed, 1);
        assert_eq!(report.errors, 0);

        assert_eq!(store.list(2).unwrap(), vec![fresh]);
        assert_eq!(store.list(3).unwrap(), vec![unrevealed]);
        assert!(!store.payload_path(2, &expired).exists());
        assert!(!store.metadata_path(2, &boundary).exists());
    }

    #[test]
    fn test_scan_never_deletes_unrevealed() {
        let (_temp, store, reaper) = setup();
        let id = put_entry(&store, 2, None);

        let far_future = Utc::now() + chrono::Duration::days(3650);
        let report = reaper.scan(far_future);

        assert_eq!(report.deleted, 0);
        assert_eq!(store.list(2).unwrap(), vec![id]);
    }

    #[test]
    fn test_scan_removes_orphaned_metadata() {
        let (_temp, store, reaper) = setup();
        let id = put_entry(&store, 2, None);
        fs::remove_file(store.payload_path(2, &id)).unwrap();

        // Too recent to tell apart from a put in progress
        let report = reaper.scan(Utc::now());
        assert_eq!(report.debris_removed, 0);
        assert!(store.metadata_path(2, &id).exists());

        let report = reaper.scan(Utc::now() + chrono::Duration::seconds(601));
        assert_eq!(report.debris_removed, 1);
        assert!(!store.metadata_path(2, &id).exists());
    }

    #[test]
    fn test_scan_keeps_recent_unpaired_payload() {
        let (_temp, store, reaper) = setup();
        let id = EntryId::generate(None);
        fs::create_dir_all(store.mailbox_path(2)).unwrap();
        fs::write(store.payload_path(2, &id), b"uploading").unwrap();

        let report = reaper.scan(Utc::now());
        assert_eq!(report.debris_removed, 0);
        assert!(store.payload_path(2, &id).exists());

        let later = Utc::now() + chrono::Duration::seconds(601);
        let report = reaper.scan(later);
        assert_eq!(report.debris_removed, 1);
        assert!(!store.payload_path(2, &id).exists());
    }

    #[test]
    fn test_scan_removes_stale_temp_files() {
        let (_temp, store, reaper) = setup();
        fs::create_dir_all(store.mailbox_path(2)).unwrap();
        let temp_file = store.mailbox_path(2).join(".123.jpg.deadbeef.tmp");
        fs::write(&temp_file, b"partial").unwrap();

        reaper.scan(Utc::now());
        assert!(temp_file.exists());

        let report = reaper.scan(Utc::now() + chrono::Duration::seconds(601));
        assert_eq!(report.debris_removed, 1);
        assert!(!temp_file.exists());
    }

    #[test]
    fn test_scan_skips_corrupt_metadata() {
        let (_temp, store, reaper) = setup();
        let good = put_entry(&store, 2, Some(Utc::now() - chrono::Duration::hours(1)));
        let bad = put_entry(&store, 2, None);
        fs::write(store.metadata_path(2, &bad), b"not json").unwrap();

        let report = reaper.scan(Utc::now());

        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors, 1);
        assert!(!store.payload_path(2, &good).exists());
        assert!(store.payload_path(2, &bad).exists());
    }

    #[tokio::test]
    async fn test_run_scans_immediately_and_stops() {
        let (_temp, store, _) = setup();
        let reaper = ExpiryReaper::new(store.clone(), RETENTION, Duration::from_secs(3600));
        let id = put_entry(&store, 2, Some(Utc::now() - chrono::Duration::hours(1)));

        let shutdown = CancellationToken::new();
        let handle = reaper.spawn(shutdown.clone());

        let mut deleted = false;
        for _ in 0..100 {
            if !store.payload_path(2, &id).exists() {
                deleted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(deleted, "first scan should run without waiting for the interval");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reaper should stop after cancellation")
            .unwrap();
    }
}
