//! Watch-list configuration document.
//!
//! ```json
//! {
//!   "services":    [{ "name": "sshd", "binary": "/usr/sbin/sshd",
//!                     "service": "/usr/lib/systemd/system/sshd.service",
//!                     "config": { "path": "/etc/ssh/sshd_config" } }],
//!   "other_files": [{ "name": "passwd", "path": "/etc/passwd" }],
//!   "directories": [{ "name": "www", "path": "/var/www/html", "recursive": true }]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

const BUILTIN: &str = include_str!("default_config.json");

/// A path field, either `"/etc/passwd"` or `{ "path": "/etc/passwd" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathRef {
    Bare(String),
    Nested { path: String },
}

impl PathRef {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bare(p) | Self::Nested { path: p } => p,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub binary: Option<PathRef>,
    #[serde(default)]
    pub service: Option<PathRef>,
    #[serde(default)]
    pub config: Option<PathRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: Option<PathRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: Option<PathRef>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_recursive() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub other_files: Vec<FileEntry>,
    #[serde(default)]
    pub directories: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub binary: PathBuf,
    pub unit: PathBuf,
    pub config: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySpec {
    pub name: String,
    pub path: PathBuf,
    pub recursive: bool,
}

/// Configuration entries that carry every required field, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchPlan {
    pub services: Vec<ServiceSpec>,
    pub files: Vec<FileSpec>,
    pub directories: Vec<DirectorySpec>,
}

impl WatchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// SSH, FTP and HTTP daemons, login shells, account databases and the
    /// web root.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::parse(BUILTIN)
    }

    /// Drop entries missing a name or a required path, logging each one.
    pub fn into_plan(self) -> WatchPlan {
        let mut plan = WatchPlan::default();

        for (i, entry) in self.services.into_iter().enumerate() {
            if entry.name.is_empty() {
                warn!(index = i, "service entry excluded: missing name");
                continue;
            }
            match (required(entry.binary), required(entry.service), required(entry.config)) {
                (Some(binary), Some(unit), Some(config)) => plan.services.push(ServiceSpec {
                    name: entry.name,
                    binary,
                    unit,
                    config,
                }),
                (binary, unit, _) => {
                    let field = if binary.is_none() {
                        "binary"
                    } else if unit.is_none() {
                        "service"
                    } else {
                        "config"
                    };
                    warn!(index = i, name = %entry.name, field, "service entry excluded: missing path");
                }
            }
        }

        for (i, entry) in self.other_files.into_iter().enumerate() {
            match (entry.name.is_empty(), required(entry.path)) {
                (false, Some(path)) => plan.files.push(FileSpec { name: entry.name, path }),
                _ => warn!(index = i, name = %entry.name, "file entry excluded: missing name or path"),
            }
        }

        for (i, entry) in self.directories.into_iter().enumerate() {
            match (entry.name.is_empty(), required(entry.path)) {
                (false, Some(path)) => plan.directories.push(DirectorySpec {
                    name: entry.name,
                    path,
                    recursive: entry.recursive,
                }),
                _ => warn!(index = i, name = %entry.name, "directory entry excluded: missing name or path"),
            }
        }

        plan
    }
}

fn required(value: Option<PathRef>) -> Option<PathBuf> {
    value
        .map(|p| p.as_str().trim().to_string())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}
