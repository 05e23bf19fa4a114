use std::path::PathBuf;

use crate::model::TripleMember;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("backup record truncated: {len} bytes, need at least {min}")]
    Truncated { len: usize, min: usize },
    #[error("backup record failed authentication (wrong passphrase or tampered record)")]
    Corrupt,
    #[error("key derivation: {0}")]
    Kdf(String),
    #[error("encrypt: {0}")]
    Encrypt(String),
    #[error("backup record has no recognised header")]
    UnknownFormat,
    #[error("backup record is encrypted but no passphrase was given")]
    KeyRequired,
    #[error("backup record is plaintext but encryption is enabled")]
    Unsealed,
}

/// Failure to capture a trusted snapshot of one object. Fatal for that object
/// only; the caller drops it from the registry and moves on.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("path unavailable: {path}")]
    PathUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("backup record for {path} is unreadable")]
    CorruptBackup {
        path: PathBuf,
        #[source]
        source: CryptoError,
    },
}

impl SnapshotError {
    pub fn unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PathUnavailable {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate name: {0}")]
    DuplicateName(String),
    #[error("service {name}: {member} unavailable")]
    IncompleteService {
        name: String,
        member: TripleMember,
        #[source]
        source: SnapshotError,
    },
    #[error("directory {name}: root unavailable")]
    DirectoryUnavailable {
        name: String,
        #[source]
        source: SnapshotError,
    },
    #[error("file {name} unavailable")]
    FileUnavailable {
        name: String,
        #[source]
        source: SnapshotError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot open configuration {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration document")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceManagerError {
    #[error("service manager unavailable: {0}")]
    Unavailable(String),
}
