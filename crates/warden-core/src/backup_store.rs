//! Trusted snapshot store.
//!
//! One record per watched object lives directly under the backup root, named
//! by [`crate::naming::record_name`]. Content records hold a 4-byte format
//! tag followed by the (optionally encrypted) payload; directory records are
//! empty marker files. Every record
//! carries the trusted mode and ownership of the object it mirrors.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::attrs::AttributeGate;
use crate::crypto::{self, BackupKey};
use crate::error::{CryptoError, SnapshotError};
use crate::meta::FileMeta;
use crate::model::{ObjectKind, WatchedObject};
use crate::naming;

const STAGING_PREFIX: &str = ".staging-";

const RECORD_MAGIC_LEN: usize = 4;
const PLAIN_MAGIC: &[u8; RECORD_MAGIC_LEN] = b"WDP1";
const SEALED_MAGIC: &[u8; RECORD_MAGIC_LEN] = b"WDS1";

pub struct BackupStore {
    root: PathBuf,
    key: Option<BackupKey>,
    persist: bool,
    load_from_backup: bool,
    gate: Arc<dyn AttributeGate>,
}

impl BackupStore {
    /// Store rooted at `root`; a relative root is resolved against the
    /// working directory once, here. A `key` of `None` keeps records in
    /// plaintext. Persisting and load-from-backup are both on by default.
    pub fn new(root: impl Into<PathBuf>, key: Option<BackupKey>, gate: Arc<dyn AttributeGate>) -> Self {
        let root = root.into();
        let root = if root.is_relative() {
            std::env::current_dir().map(|cwd| cwd.join(&root)).unwrap_or(root)
        } else {
            root
        };
        Self {
            root,
            key,
            persist: true,
            load_from_backup: true,
            gate,
        }
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn with_load_from_backup(mut self, load: bool) -> Self {
        self.load_from_backup = load;
        self
    }

    /// Create the backup root (mode 0700) and drop staging files left by a
    /// previous crash. No-op when persisting is disabled.
    pub fn prepare(&self) -> io::Result<()> {
        if !self.persist {
            return Ok(());
        }
        fs::create_dir_all(&self.root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700)) {
                warn!("cannot restrict permissions on {}: {}", self.root.display(), e);
            }
        }
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                    warn!(path = %entry.path().display(), "removing orphaned backup staging file");
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_from_backup(&self) -> bool {
        self.load_from_backup
    }

    pub fn set_load_from_backup(&mut self, load: bool) {
        self.load_from_backup = load;
    }

    pub fn persists(&self) -> bool {
        self.persist
    }

    pub fn encrypted(&self) -> bool {
        self.key.is_some()
    }

    pub fn gate(&self) -> &Arc<dyn AttributeGate> {
        &self.gate
    }

    pub fn derive_backup_name(&self, path: &Path, kind: ObjectKind) -> PathBuf {
        self.root
            .join(naming::record_name(&path.to_string_lossy(), kind))
    }

    pub fn has_record(&self, path: &Path, kind: ObjectKind) -> bool {
        self.derive_backup_name(path, kind).exists()
    }

    /// Capture the trusted state of `path` and persist it.
    ///
    /// With load-from-backup active and a record present, the record is the
    /// source of truth; otherwise the live path is read. The result is then
    /// written back to the store when persisting is enabled.
    pub fn snapshot(
        &self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        kind: ObjectKind,
    ) -> Result<WatchedObject, SnapshotError> {
        let obj = self.capture(name, path, kind)?;
        self.commit(&obj);
        Ok(obj)
    }

    /// [`Self::snapshot`] without writing the record. Pair with
    /// [`Self::commit`] when several captures must all succeed first.
    pub fn capture(
        &self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        kind: ObjectKind,
    ) -> Result<WatchedObject, SnapshotError> {
        let path = path.into();
        let record = self.derive_backup_name(&path, kind);
        let from_backup = self.load_from_backup && record.exists();
        let source = if from_backup { &record } else { &path };

        let metadata = fs::metadata(source).map_err(|e| SnapshotError::unavailable(source, e))?;
        let payload = match kind {
            ObjectKind::Directory => {
                if !from_backup && !metadata.is_dir() {
                    return Err(SnapshotError::unavailable(
                        &path,
                        io::Error::new(io::ErrorKind::Other, "not a directory"),
                    ));
                }
                Vec::new()
            }
            ObjectKind::Content => {
                let raw = fs::read(source).map_err(|e| SnapshotError::unavailable(source, e))?;
                if from_backup {
                    open_record(self.key.as_ref(), &raw).map_err(|e| SnapshotError::CorruptBackup {
                        path: record.clone(),
                        source: e,
                    })?
                } else {
                    raw
                }
            }
        };

        let immutable = path.exists() && self.gate.query(&path) == Some(true);
        let obj = WatchedObject::trusted(
            name.into(),
            path,
            kind,
            FileMeta::of(&metadata),
            immutable,
            payload,
        );
        debug!(
            name = %obj.name(),
            path = %obj.path().display(),
            from_backup,
            "snapshot captured"
        );
        Ok(obj)
    }

    /// Write the record for `obj` when persisting is enabled. Failure is
    /// logged; the in-memory snapshot stays authoritative.
    pub fn commit(&self, obj: &WatchedObject) {
        if !self.persist {
            return;
        }
        let record = self.derive_backup_name(obj.path(), obj.kind());
        if let Err(e) = self.persist_record(obj, &record) {
            warn!(path = %obj.path().display(), error = %e, "cannot write backup record");
        }
    }

    /// Trusted payload for `obj`, as captured by [`Self::snapshot`]. Never
    /// touches the disk.
    pub fn restore<'a>(&self, obj: &'a WatchedObject) -> &'a [u8] {
        obj.payload()
    }

    /// Delete the on-disk record of `obj`.
    pub fn evict(&self, obj: &WatchedObject) -> io::Result<()> {
        let record = self.derive_backup_name(obj.path(), obj.kind());
        match fs::remove_file(&record) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn persist_record(&self, obj: &WatchedObject, record: &Path) -> io::Result<()> {
        match obj.kind() {
            ObjectKind::Directory => self.write_atomic(record, &[])?,
            ObjectKind::Content => {
                let bytes = seal_record(self.key.as_ref(), obj.payload())
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                self.write_atomic(record, &bytes)?
            }
        }
        // chown clears setuid/setgid, so ownership goes first.
        if let Err(e) = obj.meta().apply_owner(record) {
            debug!(path = %record.display(), error = %e, "cannot set backup record ownership");
        }
        obj.meta().apply_mode(record)
    }

    fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> io::Result<()> {
        let staging = self
            .root
            .join(format!("{STAGING_PREFIX}{}", Uuid::new_v4()));
        {
            let mut file = File::create(&staging)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&staging, dest) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        #[cfg(unix)]
        {
            if let Ok(dir) = OpenOptions::new().read(true).open(&self.root) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

/// Content records start with a tag saying how the rest is stored, so a
/// store never mistakes ciphertext for content or the reverse.
fn seal_record(key: Option<&BackupKey>, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let (magic, body) = match key {
        Some(key) => (SEALED_MAGIC, crypto::encrypt(key, payload)?),
        None => (PLAIN_MAGIC, payload.to_vec()),
    };
    let mut record = Vec::with_capacity(magic.len() + body.len());
    record.extend_from_slice(magic);
    record.extend_from_slice(&body);
    Ok(record)
}

fn open_record(key: Option<&BackupKey>, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if record.len() < RECORD_MAGIC_LEN {
        return Err(CryptoError::UnknownFormat);
    }
    let (magic, body) = record.split_at(RECORD_MAGIC_LEN);
    match (magic, key) {
        (m, Some(key)) if m == SEALED_MAGIC => crypto::decrypt(key, body),
        (m, None) if m == SEALED_MAGIC => Err(CryptoError::KeyRequired),
        (m, None) if m == PLAIN_MAGIC => Ok(body.to_vec()),
        (m, Some(_)) if m == PLAIN_MAGIC => Err(CryptoError::Unsealed),
        _ => Err(CryptoError::UnknownFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::NoAttributes;
    use tempfile::tempdir;

    fn store(root: &Path, key: Option<BackupKey>) -> BackupStore {
        let store = BackupStore::new(root, key, Arc::new(NoAttributes));
        store.prepare().unwrap();
        store
    }

    fn key() -> BackupKey {
        BackupKey::from_bytes(*b"sixteen byte key")
    }

    #[test]
    fn snapshot_persists_encrypted_record() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("passwd");
        fs::write(&live, b"root:x:0:0").unwrap();
        let store = store(&dir.path().join("backups"), Some(key()));

        let obj = store.snapshot("passwd", &live, ObjectKind::Content).unwrap();
        assert_eq!(store.restore(&obj), b"root:x:0:0");

        let record = store.derive_backup_name(&live, ObjectKind::Content);
        let raw = fs::read(&record).unwrap();
        assert_eq!(&raw[..RECORD_MAGIC_LEN], SEALED_MAGIC);
        assert_eq!(crypto::decrypt(&key(), &raw[RECORD_MAGIC_LEN..]).unwrap(), b"root:x:0:0");
    }

    #[test]
    fn load_from_backup_survives_live_tampering() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("sshd_config");
        fs::write(&live, b"PermitRootLogin no").unwrap();
        let backups = dir.path().join("backups");

        let first = store(&backups, Some(key()));
        let trusted = first.snapshot("ssh", &live, ObjectKind::Content).unwrap();

        fs::write(&live, b"PermitRootLogin yes").unwrap();

        let restarted = store(&backups, Some(key()));
        let reloaded = restarted.snapshot("ssh", &live, ObjectKind::Content).unwrap();
        assert_eq!(reloaded.digest(), trusted.digest());
        assert_eq!(restarted.restore(&reloaded), b"PermitRootLogin no");

        let fresh = store(&backups, Some(key())).with_load_from_backup(false);
        let live_state = fresh.snapshot("ssh", &live, ObjectKind::Content).unwrap();
        assert_eq!(fresh.restore(&live_state), b"PermitRootLogin yes");
    }

    #[test]
    fn wrong_passphrase_backup_is_rejected() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("f");
        fs::write(&live, b"data").unwrap();
        let backups = dir.path().join("backups");
        store(&backups, Some(key()))
            .snapshot("f", &live, ObjectKind::Content)
            .unwrap();

        let other = store(&backups, Some(BackupKey::from_bytes([7u8; 16])));
        let err = other.snapshot("f", &live, ObjectKind::Content).unwrap_err();
        assert!(matches!(err, SnapshotError::CorruptBackup { .. }));
    }

    #[test]
    fn missing_path_is_unavailable() {
        let dir = tempdir().unwrap();
        let store = store(&dir.path().join("backups"), None);
        let err = store
            .snapshot("ghost", dir.path().join("ghost"), ObjectKind::Content)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::PathUnavailable { .. }));
    }

    #[test]
    fn directory_marker_records_metadata() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("www");
        fs::create_dir(&tree).unwrap();
        let store = store(&dir.path().join("backups"), None);
        let obj = store.snapshot("www", &tree, ObjectKind::Directory).unwrap();
        assert!(obj.is_directory());
        assert_eq!(obj.digest(), None);

        let record = store.derive_backup_name(&tree, ObjectKind::Directory);
        assert!(record.to_string_lossy().ends_with(naming::DIRECTORY_SUFFIX));
        assert_eq!(FileMeta::read(&record).unwrap().mode, obj.meta().mode);
    }

    #[test]
    fn evict_removes_record_and_tolerates_absence() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("f");
        fs::write(&live, b"data").unwrap();
        let store = store(&dir.path().join("backups"), None);
        let obj = store.snapshot("f", &live, ObjectKind::Content).unwrap();
        assert!(store.has_record(&live, ObjectKind::Content));
        store.evict(&obj).unwrap();
        assert!(!store.has_record(&live, ObjectKind::Content));
        store.evict(&obj).unwrap();
    }

    #[test]
    fn no_persist_leaves_root_untouched() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("f");
        fs::write(&live, b"data").unwrap();
        let backups = dir.path().join("backups");
        let store = BackupStore::new(&backups, None, Arc::new(NoAttributes)).with_persist(false);
        store.prepare().unwrap();
        store.snapshot("f", &live, ObjectKind::Content).unwrap();
        assert!(!backups.exists());
    }

    #[test]
    fn sealed_record_without_key_is_corrupt_not_content() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("bash");
        fs::write(&live, b"\x7fELF trusted").unwrap();
        let backups = dir.path().join("backups");
        store(&backups, Some(key()))
            .snapshot("bash", &live, ObjectKind::Content)
            .unwrap();

        let plain = store(&backups, None);
        let err = plain.snapshot("bash", &live, ObjectKind::Content).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::CorruptBackup { source: CryptoError::KeyRequired, .. }
        ));
        assert_eq!(fs::read(&live).unwrap(), b"\x7fELF trusted");
    }

    #[test]
    fn plaintext_record_under_key_is_rejected() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("passwd");
        fs::write(&live, b"root:x:0:0").unwrap();
        let backups = dir.path().join("backups");
        store(&backups, None).snapshot("passwd", &live, ObjectKind::Content).unwrap();

        let sealed = store(&backups, Some(key()));
        let err = sealed.snapshot("passwd", &live, ObjectKind::Content).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::CorruptBackup { source: CryptoError::Unsealed, .. }
        ));
    }

    #[test]
    fn headerless_record_is_rejected() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("f");
        fs::write(&live, b"data").unwrap();
        let store = store(&dir.path().join("backups"), None);
        fs::write(store.derive_backup_name(&live, ObjectKind::Content), b"raw").unwrap();

        let err = store.snapshot("f", &live, ObjectKind::Content).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::CorruptBackup { source: CryptoError::UnknownFormat, .. }
        ));
    }

    #[test]
    fn capture_defers_the_record_until_commit() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("f");
        fs::write(&live, b"data").unwrap();
        let store = store(&dir.path().join("backups"), None);

        let obj = store.capture("f", &live, ObjectKind::Content).unwrap();
        assert!(!store.has_record(&live, ObjectKind::Content));
        store.commit(&obj);
        assert!(store.has_record(&live, ObjectKind::Content));
    }

    #[test]
    fn relative_root_is_resolved_once() {
        let store = BackupStore::new(".warden", None, Arc::new(NoAttributes));
        assert!(store.root().is_absolute());
        assert!(store.root().ends_with(".warden"));
    }
}
