//! On-disk mailbox storage.
//!
//! Each recipient owns a directory holding payload/metadata file pairs:
//! ```text
//! {media_dir}/mailboxes/
//! ├── 2/
//! │   ├── 1718000000123456789.jpg
//! │   └── 1718000000123456789.jpg.json
//! └── 3/
//!     └── ...
//! ```
//!
//! Both halves are written to a hidden temp file and renamed into place,
//! payload first and metadata last. An entry is visible only once its
//! metadata exists, and it is removed metadata first, so readers never see
//! a half-written pair.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{EntryId, EntryMetadata, METADATA_SUFFIX};
use crate::directory::UserId;
use crate::{ClipperError, Result};

/// Subdirectory of the media root holding one directory per recipient.
pub const MAILBOXES_DIR: &str = "mailboxes";

/// Suffix of in-flight temp files. Temp files also start with a dot.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Classified contents of one mailbox directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MailboxInventory {
    /// Entries with a metadata file.
    pub metadata: BTreeSet<EntryId>,
    /// Entries with a payload file.
    pub payloads: BTreeSet<EntryId>,
    /// Leftover temp files from interrupted writes.
    pub temp_files: Vec<PathBuf>,
}

impl MailboxInventory {
    /// Entries with both halves present, in ascending ID order.
    pub fn complete(&self) -> Vec<EntryId> {
        self.metadata.intersection(&self.payloads).cloned().collect()
    }

    /// Metadata files whose payload is gone.
    pub fn orphaned_metadata(&self) -> Vec<EntryId> {
        self.metadata.difference(&self.payloads).cloned().collect()
    }

    /// Payloads with no metadata: either mid-upload or left behind.
    pub fn unpaired_payloads(&self) -> Vec<EntryId> {
        self.payloads.difference(&self.metadata).cloned().collect()
    }
}

/// Filesystem store of per-recipient mailboxes.
///
/// Clones share the same metadata update lock.
#[derive(Debug, Clone)]
pub struct MailboxStore {
    /// `{media_dir}/mailboxes`.
    root: PathBuf,
    /// Serializes read-modify-write of metadata within this process.
    update_lock: Arc<Mutex<()>>,
}

impl MailboxStore {
    /// Open the store under `media_dir`, creating the mailboxes directory.
    pub fn new(media_dir: impl AsRef<Path>) -> Result<Self> {
        let root = media_dir.as_ref().join(MAILBOXES_DIR);
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            update_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Directory containing every mailbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one recipient's mailbox.
    pub fn mailbox_path(&self, recipient: UserId) -> PathBuf {
        self.root.join(recipient.to_string())
    }

    /// Path of an entry's payload.
    pub fn payload_path(&self, recipient: UserId, id: &EntryId) -> PathBuf {
        self.mailbox_path(recipient).join(id.as_str())
    }

    /// Path of an entry's metadata.
    pub fn metadata_path(&self, recipient: UserId, id: &EntryId) -> PathBuf {
        self.mailbox_path(recipient).join(id.metadata_file_name())
    }

    /// Store one entry in `recipient`'s mailbox.
    ///
    /// The payload is renamed into place before the metadata, so the entry
    /// becomes visible all at once. If the metadata cannot be written the
    /// payload is removed again.
    pub fn put(
        &self,
        recipient: UserId,
        id: &EntryId,
        payload: &[u8],
        metadata: &EntryMetadata,
    ) -> Result<()> {
        fs::create_dir_all(self.mailbox_path(recipient))?;

        let metadata_bytes = serde_json::to_vec(metadata)?;
        let payload_path = self.payload_path(recipient, id);

        write_atomic(&payload_path, payload)?;
        if let Err(e) = write_atomic(&self.metadata_path(recipient, id), &metadata_bytes) {
            if let Err(cleanup) = remove_if_exists(&payload_path) {
                warn!(entry = %id, recipient, error = %cleanup, "failed to remove payload after metadata write error");
            }
            return Err(e);
        }

        Ok(())
    }

    /// Classify the files in `recipient`'s mailbox.
    ///
    /// A missing mailbox yields an empty inventory. Names that are not valid
    /// entry IDs are ignored.
    pub fn inventory(&self, recipient: UserId) -> Result<MailboxInventory> {
        let mut inventory = MailboxInventory::default();

        let dir = match fs::read_dir(self.mailbox_path(recipient)) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(inventory),
            Err(e) => return Err(e.into()),
        };

        for dir_entry in dir {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }
            let file_name = dir_entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            if name.starts_with('.') {
                if name.ends_with(TEMP_SUFFIX) {
                    inventory.temp_files.push(dir_entry.path());
                }
            } else if let Some(stem) = name.strip_suffix(METADATA_SUFFIX) {
                if let Some(id) = EntryId::parse(stem) {
                    inventory.metadata.insert(id);
                }
            } else if let Some(id) = EntryId::parse(name) {
                inventory.payloads.insert(id);
            } else {
                debug!(recipient, file = name, "ignoring unrecognized mailbox file");
            }
        }

        Ok(inventory)
    }

    /// IDs of the complete entries in `recipient`'s mailbox.
    pub fn list(&self, recipient: UserId) -> Result<Vec<EntryId>> {
        Ok(self.inventory(recipient)?.complete())
    }

    /// Every recipient that has a mailbox directory, ascending.
    pub fn mailboxes(&self) -> Result<Vec<UserId>> {
        let mut recipients = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            match dir_entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                Some(recipient) => recipients.push(recipient),
                None => debug!(path = %dir_entry.path().display(), "ignoring non-mailbox directory"),
            }
        }
        recipients.sort_unstable();
        Ok(recipients)
    }

    /// Read an entry's metadata.
    ///
    /// Fails with [`ClipperError::NotFound`] unless both halves exist.
    pub fn read_metadata(&self, recipient: UserId, id: &EntryId) -> Result<EntryMetadata> {
        let bytes = read_entry_file(&self.metadata_path(recipient, id), id)?;
        if !self.payload_path(recipient, id).is_file() {
            return Err(not_found(id));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read an entry's payload.
    ///
    /// Fails with [`ClipperError::NotFound`] unless both halves exist.
    pub fn read_payload(&self, recipient: UserId, id: &EntryId) -> Result<Vec<u8>> {
        if !self.metadata_path(recipient, id).is_file() {
            return Err(not_found(id));
        }
        read_entry_file(&self.payload_path(recipient, id), id)
    }

    /// Size of an entry's payload in bytes.
    pub fn payload_len(&self, recipient: UserId, id: &EntryId) -> Result<u64> {
        match fs::metadata(self.payload_path(recipient, id)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write an entry's metadata.
    ///
    /// `mutate` returns whether it changed anything; unchanged metadata is not
    /// rewritten. Returns the resulting metadata, or `None` when the entry does
    /// not exist. Updates are serialized, so two callers never both act on
    /// the same stale read. A concurrent delete always wins: if the payload
    /// disappears while the new metadata is written, that metadata is
    /// removed again.
    pub fn update_metadata<F>(
        &self,
        recipient: UserId,
        id: &EntryId,
        mutate: F,
    ) -> Result<Option<EntryMetadata>>
    where
        F: FnOnce(&mut EntryMetadata) -> bool,
    {
        let _guard = self
            .update_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut metadata = match self.read_metadata(recipient, id) {
            Ok(metadata) => metadata,
            Err(ClipperError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if !mutate(&mut metadata) {
            return Ok(Some(metadata));
        }

        let metadata_path = self.metadata_path(recipient, id);
        write_atomic(&metadata_path, &serde_json::to_vec(&metadata)?)?;

        if !self.payload_path(recipient, id).is_file() {
            remove_if_exists(&metadata_path)?;
            return Ok(None);
        }

        Ok(Some(metadata))
    }

    /// Remove an entry, metadata first.
    ///
    /// Returns `true` if either half existed.
    pub fn delete(&self, recipient: UserId, id: &EntryId) -> Result<bool> {
        let had_metadata = remove_if_exists(&self.metadata_path(recipient, id))?;
        let had_payload = remove_if_exists(&self.payload_path(recipient, id))?;
        Ok(had_metadata || had_payload)
    }

    /// Remove a metadata file whose payload is missing.
    ///
    /// The payload is checked again first, since an inventory taken during a
    /// concurrent `put` can miss a payload that is already in place. Returns
    /// `false` if the entry turned out to be complete.
    pub fn remove_orphaned_metadata(&self, recipient: UserId, id: &EntryId) -> Result<bool> {
        if self.payload_path(recipient, id).is_file() {
            return Ok(false);
        }
        remove_if_exists(&self.metadata_path(recipient, id))
    }

    /// Remove a payload file that has no metadata.
    ///
    /// Returns `false` if metadata has appeared since the inventory.
    pub fn remove_unpaired_payload(&self, recipient: UserId, id: &EntryId) -> Result<bool> {
        if self.metadata_path(recipient, id).is_file() {
            return Ok(false);
        }
        remove_if_exists(&self.payload_path(recipient, id))
    }

    /// Remove a leftover temp file found by [`MailboxStore::inventory`].
    pub fn remove_temp_file(&self, path: &Path) -> Result<bool> {
        remove_if_exists(path)
    }

    /// Last modification time of a file in the store.
    pub fn modified_at(&self, path: &Path) -> Result<DateTime<Utc>> {
        Ok(DateTime::from(fs::metadata(path)?.modified()?))
    }
}

fn not_found(id: &EntryId) -> ClipperError {
    ClipperError::NotFound(format!("entry {id}"))
}

fn read_entry_file(path: &Path, id: &EntryId) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found(id)),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Write `bytes` to a hidden sibling temp file, then rename it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(
        ".{file_name}.{}{TEMP_SUFFIX}",
        Uuid::new_v4().simple()
    ));

    let written = File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&temp_path, path));

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, MailboxStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = MailboxStore::new(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    fn sample_metadata() -> EntryMetadata {
        EntryMetadata::new(Some(100), 1, "image", vec![2, 3])
    }

    #[test]
    fn test_new_creates_mailboxes_dir() {
        let (temp_dir, store) = setup();
        assert!(temp_dir.path().join(MAILBOXES_DIR).is_dir());
        assert_eq!(store.root(), temp_dir.path().join(MAILBOXES_DIR));
    }

    #[test]
    fn test_put_and_read() {
        let (_temp, store) = setup();
        let id = EntryId::generate(Some("a.jpg"));

        store.put(2, &id, b"jpeg bytes", &sample_metadata()).unwrap();

        assert_eq!(store.read_payload(2, &id).unwrap(), b"jpeg bytes");
        assert_eq!(store.read_metadata(2, &id).unwrap(), sample_metadata());
        assert_eq!(store.payload_len(2, &id).unwrap(), 10);
        assert!(store.payload_path(2, &id).is_file());
        assert!(store.metadata_path(2, &id).is_file());
    }

    #[test]
    fn test_put_leaves_no_temp_files() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        store.put(2, &id, b"x", &sample_metadata()).unwrap();

        let inventory = store.inventory(2).unwrap();
        assert!(inventory.temp_files.is_empty());
        assert_eq!(inventory.complete(), vec![id]);
    }

    #[test]
    fn test_list_missing_mailbox_is_empty() {
        let (_temp, store) = setup();
        assert!(store.list(99).unwrap().is_empty());
    }

    #[test]
    fn test_list_requires_both_halves() {
        let (_temp, store) = setup();
        let complete = EntryId::generate(None);
        store.put(2, &complete, b"x", &sample_metadata()).unwrap();

        // Payload renamed in but metadata not yet written
        let in_flight = EntryId::generate(None);
        fs::write(store.payload_path(2, &in_flight), b"y").unwrap();

        // Metadata whose payload was already removed
        let orphan = EntryId::generate(None);
        fs::write(
            store.metadata_path(2, &orphan),
            serde_json::to_vec(&sample_metadata()).unwrap(),
        )
        .unwrap();

        assert_eq!(store.list(2).unwrap(), vec![complete]);

        let inventory = store.inventory(2).unwrap();
        assert_eq!(inventory.unpaired_payloads(), vec![in_flight.clone()]);
        assert_eq!(inventory.orphaned_metadata(), vec![orphan.clone()]);

        assert!(matches!(
            store.read_payload(2, &in_flight),
            Err(ClipperError::NotFound(_))
        ));
        assert!(matches!(
            store.read_metadata(2, &orphan),
            Err(ClipperError::NotFound(_))
        ));
    }

    #[test]
    fn test_inventory_classifies_files() {
        let (_temp, store) = setup();
        let mailbox = store.mailbox_path(2);
        fs::create_dir_all(mailbox.join("nested")).unwrap();
        fs::write(mailbox.join(".123.jpg.abcd.tmp"), b"partial").unwrap();
        fs::write(mailbox.join(".DS_Store"), b"").unwrap();
        fs::write(mailbox.join("bad name"), b"").unwrap();

        let inventory = store.inventory(2).unwrap();

        assert_eq!(inventory.temp_files, vec![mailbox.join(".123.jpg.abcd.tmp")]);
        assert!(inventory.metadata.is_empty());
        assert!(inventory.payloads.is_empty());
    }

    #[test]
    fn test_list_sorted_by_id() {
        let (_temp, store) = setup();
        let ids: Vec<EntryId> = (0..5).map(|_| EntryId::generate(None)).collect();
        for id in ids.iter().rev() {
            store.put(2, id, b"x", &sample_metadata()).unwrap();
        }
        assert_eq!(store.list(2).unwrap(), ids);
    }

    #[test]
    fn test_mailboxes() {
        let (_temp, store) = setup();
        store.put(9, &EntryId::generate(None), b"x", &sample_metadata()).unwrap();
        store.put(2, &EntryId::generate(None), b"x", &sample_metadata()).unwrap();
        fs::create_dir_all(store.root().join("not-a-user")).unwrap();

        assert_eq!(store.mailboxes().unwrap(), vec![2, 9]);
    }

    #[test]
    fn test_read_missing_entry() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        assert!(matches!(
            store.read_metadata(2, &id),
            Err(ClipperError::NotFound(_))
        ));
        assert!(matches!(
            store.read_payload(2, &id),
            Err(ClipperError::NotFound(_))
        ));
        assert!(matches!(
            store.payload_len(2, &id),
            Err(ClipperError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_metadata() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        store.put(2, &id, b"x", &sample_metadata()).unwrap();

        let at = Utc::now();
        let updated = store
            .update_metadata(2, &id, |m| m.mark_revealed(at))
            .unwrap()
            .unwrap();
        assert!(updated.is_revealed());

        let stored = store.read_metadata(2, &id).unwrap();
        assert_eq!(
            stored.revealed_at.map(|t| t.timestamp_millis()),
            Some(at.timestamp_millis())
        );
    }

    #[test]
    fn test_update_metadata_unchanged_is_not_rewritten() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        store.put(2, &id, b"x", &sample_metadata()).unwrap();
        let before = store.modified_at(&store.metadata_path(2, &id)).unwrap();

        let result = store.update_metadata(2, &id, |_| false).unwrap();

        assert_eq!(result, Some(sample_metadata()));
        assert_eq!(
            store.modified_at(&store.metadata_path(2, &id)).unwrap(),
            before
        );
    }

    #[test]
    fn test_update_metadata_missing_entry() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);

        let result = store.update_metadata(2, &id, |m| m.mark_revealed(Utc::now()));

        assert_eq!(result.unwrap(), None);
        assert!(!store.metadata_path(2, &id).exists());
    }

    #[test]
    fn test_update_metadata_does_not_resurrect_deleted_entry() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        store.put(2, &id, b"x", &sample_metadata()).unwrap();

        // Delete lands between the read and the write
        let result = store.update_metadata(2, &id, |m| {
            store.delete(2, &id).unwrap();
            m.mark_revealed(Utc::now())
        });

        assert_eq!(result.unwrap(), None);
        assert!(!store.metadata_path(2, &id).exists());
        assert!(!store.payload_path(2, &id).exists());
        assert!(store.list(2).unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        store.put(2, &id, b"x", &sample_metadata()).unwrap();

        assert!(store.delete(2, &id).unwrap());
        assert!(!store.delete(2, &id).unwrap());
        assert!(store.list(2).unwrap().is_empty());
    }

    #[test]
    fn test_delete_half_entry() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        fs::create_dir_all(store.mailbox_path(2)).unwrap();
        fs::write(store.payload_path(2, &id), b"x").unwrap();

        assert!(store.delete(2, &id).unwrap());
        assert!(!store.payload_path(2, &id).exists());
    }

    #[test]
    fn test_remove_orphaned_metadata_keeps_complete_entry() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        store.put(2, &id, b"x", &sample_metadata()).unwrap();

        // Inventory missed the payload, but it is in place
        assert!(!store.remove_orphaned_metadata(2, &id).unwrap());
        assert_eq!(store.list(2).unwrap(), vec![id.clone()]);

        fs::remove_file(store.payload_path(2, &id)).unwrap();
        assert!(store.remove_orphaned_metadata(2, &id).unwrap());
        assert!(!store.metadata_path(2, &id).exists());
    }

    #[test]
    fn test_remove_unpaired_payload_keeps_complete_entry() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        store.put(2, &id, b"x", &sample_metadata()).unwrap();

        assert!(!store.remove_unpaired_payload(2, &id).unwrap());
        assert!(store.payload_path(2, &id).is_file());

        fs::remove_file(store.metadata_path(2, &id)).unwrap();
        assert!(store.remove_unpaired_payload(2, &id).unwrap());
        assert!(!store.payload_path(2, &id).exists());
    }

    #[test]
    fn test_mailboxes_are_isolated() {
        let (_temp, store) = setup();
        let id = EntryId::generate(None);
        store.put(2, &id, b"x", &sample_metadata()).unwrap();

        assert!(store.list(3).unwrap().is_empty());
        assert!(matches!(
            store.read_payload(3, &id),
            Err(ClipperError::NotFound(_))
        ));
    }
}
