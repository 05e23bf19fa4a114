//! Permission bits and ownership of a path.

use std::fs;
use std::io;
use std::path::Path;

/// Only permission, setuid/setgid and sticky bits are tracked; the file type
/// bits are implied by [`crate::model::ObjectKind`].
pub const MODE_MASK: u32 = 0o7777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileMeta {
    pub fn of(metadata: &fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                mode: metadata.mode() & MODE_MASK,
                uid: metadata.uid(),
                gid: metadata.gid(),
            }
        }
        #[cfg(not(unix))]
        {
            let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
            Self { mode, uid: 0, gid: 0 }
        }
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        fs::metadata(path).map(|m| Self::of(&m))
    }

    pub fn apply_mode(&self, path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(self.mode))
        }
        #[cfg(not(unix))]
        {
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_readonly(self.mode & 0o222 == 0);
            fs::set_permissions(path, perms)
        }
    }

    pub fn apply_owner(&self, path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::chown(path, Some(self.uid), Some(self.gid))
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            Ok(())
        }
    }

    pub fn same_owner(&self, other: &FileMeta) -> bool {
        self.uid == other.uid && self.gid == other.gid
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mode_roundtrip_strips_type_bits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"x").unwrap();
        let wanted = FileMeta {
            mode: 0o640,
            ..FileMeta::read(&path).unwrap()
        };
        wanted.apply_mode(&path).unwrap();
        let meta = FileMeta::read(&path).unwrap();
        assert_eq!(meta.mode, 0o640);
        assert!(meta.same_owner(&wanted));
    }

    #[test]
    fn chown_to_current_owner_succeeds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"x").unwrap();
        let meta = FileMeta::read(&path).unwrap();
        meta.apply_owner(&path).unwrap();
    }
}
