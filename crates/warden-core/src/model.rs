use std::fmt;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::meta::FileMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Regular content, compared by digest.
    Content,
    /// Directory marker, compared by existence.
    Directory,
}

/// One protected path together with its trusted state.
///
/// Digest and payload are captured together by
/// [`crate::backup_store::BackupStore::snapshot`] and are never re-derived
/// from the live path afterwards.
pub struct WatchedObject {
    name: String,
    path: PathBuf,
    kind: ObjectKind,
    meta: FileMeta,
    immutable: bool,
    digest: Option<String>,
    payload: Zeroizing<Vec<u8>>,
}

impl WatchedObject {
    pub(crate) fn trusted(
        name: String,
        path: PathBuf,
        kind: ObjectKind,
        meta: FileMeta,
        immutable: bool,
        payload: Vec<u8>,
    ) -> Self {
        let digest = match kind {
            ObjectKind::Content => Some(crate::checksum::digest_hex(&payload)),
            ObjectKind::Directory => None,
        };
        Self {
            name,
            path,
            kind,
            meta,
            immutable,
            digest,
            payload: Zeroizing::new(payload),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == ObjectKind::Directory
    }

    pub fn meta(&self) -> FileMeta {
        self.meta
    }

    /// Whether the trusted state carried the immutable flag.
    pub fn immutable(&self) -> bool {
        self.immutable
    }

    /// Hex SHA-256 of the trusted payload; `None` for directory markers.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Debug for WatchedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchedObject")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("meta", &self.meta)
            .field("immutable", &self.immutable)
            .field("digest", &self.digest)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripleMember {
    Binary,
    Unit,
    Config,
}

impl TripleMember {
    pub const ALL: [TripleMember; 3] = [Self::Binary, Self::Unit, Self::Config];

    fn index(self) -> usize {
        match self {
            Self::Binary => 0,
            Self::Unit => 1,
            Self::Config => 2,
        }
    }
}

impl fmt::Display for TripleMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::Unit => "service",
            Self::Config => "config",
        })
    }
}

/// A service's binary, unit file and config, tracked as one unit.
#[derive(Debug)]
pub struct ServiceTriple {
    name: String,
    members: [WatchedObject; 3],
}

impl ServiceTriple {
    pub(crate) fn new(name: String, binary: WatchedObject, unit: WatchedObject, config: WatchedObject) -> Self {
        Self {
            name,
            members: [binary, unit, config],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member(&self, which: TripleMember) -> &WatchedObject {
        &self.members[which.index()]
    }

    pub fn members(&self) -> impl Iterator<Item = (TripleMember, &WatchedObject)> {
        TripleMember::ALL.into_iter().map(move |m| (m, self.member(m)))
    }

    /// Name the OS service manager knows the service by: the file name of
    /// the unit path.
    pub fn unit_name(&self) -> String {
        let unit = self.member(TripleMember::Unit).path();
        unit.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| unit.display().to_string())
    }

    pub(crate) fn into_members(self) -> [WatchedObject; 3] {
        self.members
    }
}

/// A directory tree captured at registration time. The first entry is the
/// root's own marker, followed by every descendant depth-first.
#[derive(Debug)]
pub struct Directory {
    name: String,
    root: PathBuf,
    recursive: bool,
    entries: Vec<WatchedObject>,
}

impl Directory {
    pub(crate) fn new(name: String, root: PathBuf, recursive: bool, entries: Vec<WatchedObject>) -> Self {
        Self {
            name,
            root,
            recursive,
            entries,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn entries(&self) -> &[WatchedObject] {
        &self.entries
    }

    pub(crate) fn into_entries(self) -> Vec<WatchedObject> {
        self.entries
    }
}
