//! Repair of drifted objects.
//!
//! Content is written to a staging file beside the target and renamed into
//! place, or rewritten in place when the filesystem has no room for a second
//! copy. Ownership and mode are reapplied afterwards. Mode failure fails the
//! repair; ownership failure is reported but the repair still counts.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::attrs::AttributeGate;
use crate::backup_store::BackupStore;
use crate::meta::FileMeta;
use crate::model::{ObjectKind, WatchedObject};

const STAGING_PREFIX: &str = ".warden_restore_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    Restored,
    RestoredWithoutOwnership { error: String },
    Failed { error: String },
}

impl RepairOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataDrift {
    Mode { expected: u32, actual: u32 },
    Owner { expected: (u32, u32), actual: (u32, u32) },
    ImmutableCleared,
    Unreadable(String),
}

impl std::fmt::Display for MetadataDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mode { expected, actual } => write!(f, "mode {actual:o}, expected {expected:o}"),
            Self::Owner { expected, actual } => write!(
                f,
                "owner {}:{}, expected {}:{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            Self::ImmutableCleared => f.write_str("immutable flag removed"),
            Self::Unreadable(e) => write!(f, "metadata unreadable: {e}"),
        }
    }
}

pub struct RestoreExecutor {
    gate: Arc<dyn AttributeGate>,
}

impl RestoreExecutor {
    pub fn new(gate: Arc<dyn AttributeGate>) -> Self {
        Self { gate }
    }

    /// Bring `obj`'s live path back to its trusted state.
    pub fn repair(&self, store: &BackupStore, obj: &WatchedObject) -> RepairOutcome {
        let path = obj.path();
        if path.symlink_metadata().is_err() {
            debug!(path = %path.display(), "path missing, recreating");
        } else if self.gate.is_immutable(path) && !self.gate.clear_immutable(path) {
            warn!(path = %path.display(), "cannot clear immutable flag");
        }

        let outcome = match obj.kind() {
            ObjectKind::Directory => self.repair_directory(obj),
            ObjectKind::Content => match write_content(path, store.restore(obj)) {
                Ok(()) => apply_meta(obj.meta(), path),
                Err(e) => RepairOutcome::Failed { error: e.to_string() },
            },
        };
        if outcome.succeeded() {
            self.reseal(obj);
        }
        outcome
    }

    /// Reapply trusted ownership, mode and immutable flag without touching
    /// content.
    pub fn sync_permissions(&self, obj: &WatchedObject) -> RepairOutcome {
        let path = obj.path();
        let relock = obj.immutable() && self.gate.query(path) == Some(true);
        if relock && !self.gate.clear_immutable(path) {
            warn!(path = %path.display(), "cannot clear immutable flag");
        }
        let outcome = apply_meta(obj.meta(), path);
        if outcome.succeeded() {
            self.reseal(obj);
        }
        outcome
    }

    /// First divergence between the live metadata and the trusted values.
    pub fn metadata_drift(&self, obj: &WatchedObject) -> Option<MetadataDrift> {
        let live = match FileMeta::read(obj.path()) {
            Ok(m) => m,
            Err(e) => return Some(MetadataDrift::Unreadable(e.to_string())),
        };
        let trusted = obj.meta();
        if live.mode != trusted.mode {
            return Some(MetadataDrift::Mode {
                expected: trusted.mode,
                actual: live.mode,
            });
        }
        if !live.same_owner(&trusted) {
            return Some(MetadataDrift::Owner {
                expected: (trusted.uid, trusted.gid),
                actual: (live.uid, live.gid),
            });
        }
        if obj.immutable() && self.gate.query(obj.path()) == Some(false) {
            return Some(MetadataDrift::ImmutableCleared);
        }
        None
    }

    fn repair_directory(&self, obj: &WatchedObject) -> RepairOutcome {
        let path = obj.path();
        match path.symlink_metadata() {
            Ok(m) if m.is_dir() => {}
            Ok(_) => {
                if let Err(e) = fs::remove_file(path) {
                    return RepairOutcome::Failed {
                        error: format!("cannot remove non-directory at {}: {e}", path.display()),
                    };
                }
                if let Err(e) = create_dir(path, obj.meta().mode) {
                    return RepairOutcome::Failed { error: e.to_string() };
                }
            }
            Err(_) => {
                if let Err(e) = create_dir(path, obj.meta().mode) {
                    return RepairOutcome::Failed { error: e.to_string() };
                }
            }
        }
        // The directory exists again; metadata errors only degrade the result.
        match apply_meta(obj.meta(), path) {
            RepairOutcome::Failed { error } => {
                warn!(path = %path.display(), %error, "directory recreated without trusted mode");
                RepairOutcome::Restored
            }
            other => other,
        }
    }

    fn reseal(&self, obj: &WatchedObject) {
        if obj.immutable() && !self.gate.set_immutable(obj.path()) {
            warn!(path = %obj.path().display(), "cannot restore immutable flag");
        }
    }
}

fn apply_meta(meta: FileMeta, path: &Path) -> RepairOutcome {
    // chown clears setuid/setgid, so ownership goes first.
    let owner = meta.apply_owner(path);
    if let Err(e) = meta.apply_mode(path) {
        return RepairOutcome::Failed {
            error: format!("chmod {:o} on {}: {e}", meta.mode, path.display()),
        };
    }
    match owner {
        Ok(()) => RepairOutcome::Restored,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot restore ownership");
            RepairOutcome::RestoredWithoutOwnership {
                error: format!("chown {}:{} on {}: {e}", meta.uid, meta.gid, path.display()),
            }
        }
    }
}

/// Missing parents get default permissions; only the leaf takes `mode`.
fn create_dir(path: &Path, mode: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    match builder.create(path) {
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        other => other,
    }
}

fn write_content(target: &Path, payload: &[u8]) -> anyhow::Result<()> {
    use anyhow::{anyhow, Context};

    if target.symlink_metadata().map(|m| m.is_dir()).unwrap_or(false) {
        return Err(anyhow!("{} is now a directory; refusing to replace it", target.display()));
    }
    let parent = target
        .parent()
        .ok_or_else(|| anyhow!("no parent dir for {}", target.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let stage = has_room(parent, payload.len() as u64);
    if !stage {
        warn!(path = %target.display(), bytes = payload.len(), "no room for a staging copy, writing in place");
    }
    write_payload(target, parent, payload, stage)
}

fn write_payload(target: &Path, parent: &Path, payload: &[u8], stage: bool) -> anyhow::Result<()> {
    use anyhow::Context;

    let mut in_place = !stage;
    if stage {
        let staging = parent.join(format!("{}{:08x}", STAGING_PREFIX, rand::random::<u32>()));
        let staged = (|| -> std::io::Result<()> {
            let mut file = File::create(&staging)?;
            file.write_all(payload)?;
            file.sync_all()?;
            fs::rename(&staging, target)
        })();
        if let Err(e) = staged {
            let _ = fs::remove_file(&staging);
            // Parent may refuse new entries (immutable, read-only); fall back
            // to rewriting in place.
            debug!(path = %target.display(), error = %e, "staged restore failed, writing in place");
            in_place = true;
        }
    }
    if in_place {
        fs::write(target, payload).with_context(|| format!("write {}", target.display()))?;
    }

    #[cfg(unix)]
    {
        if let Ok(dir) = OpenOptions::new().read(true).open(parent) {
            let _ = dir.sync_all();
        }
    }
    info!(path = %target.display(), bytes = payload.len(), "content restored");
    Ok(())
}

/// Whether `dir` can hold a staging copy of `needed` bytes. An unknown
/// answer counts as room.
fn has_room(dir: &Path, needed: u64) -> bool {
    #[cfg(unix)]
    {
        use std::mem::MaybeUninit;
        let Ok(c_path) = std::ffi::CString::new(dir.to_string_lossy().as_bytes()) else {
            return true;
        };
        let mut stat = MaybeUninit::<libc::statvfs>::uninit();
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if ret != 0 {
            warn!(dir = %dir.display(), "statvfs failed; skipping space check");
            return true;
        }
        let stat = unsafe { stat.assume_init() };
        let available = stat.f_bavail as u64 * stat.f_frsize as u64;
        available >= needed
    }
    #[cfg(not(unix))]
    {
        let _ = (dir, needed);
        true
    }
}
