//! Filesystem immutable flag (`chattr +i`).

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

pub trait AttributeGate: Send + Sync {
    /// `Some(flag)` when the attribute could be read, `None` otherwise.
    fn query(&self, path: &Path) -> Option<bool>;

    fn clear_immutable(&self, path: &Path) -> bool;

    fn set_immutable(&self, path: &Path) -> bool;

    /// Unknown is reported as immutable so a writer clears the flag first.
    fn is_immutable(&self, path: &Path) -> bool {
        self.query(path).unwrap_or(true)
    }
}

/// Uses the e2fsprogs `lsattr`/`chattr` tools.
pub struct Chattr {
    lsattr: PathBuf,
    chattr: PathBuf,
}

impl Chattr {
    pub fn new() -> Self {
        Self {
            lsattr: which::which("lsattr").unwrap_or_else(|_| PathBuf::from("lsattr")),
            chattr: which::which("chattr").unwrap_or_else(|_| PathBuf::from("chattr")),
        }
    }

    fn run_chattr(&self, flag: &str, path: &Path) -> bool {
        if !path.exists() {
            return true;
        }
        match Command::new(&self.chattr)
            .arg(flag)
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "chattr unavailable");
                false
            }
        }
    }
}

impl Default for Chattr {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeGate for Chattr {
    fn query(&self, path: &Path) -> Option<bool> {
        let output = Command::new(&self.lsattr)
            .arg("-d")
            .arg(path)
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_lsattr(&String::from_utf8_lossy(&output.stdout))
    }

    fn clear_immutable(&self, path: &Path) -> bool {
        self.run_chattr("-i", path)
    }

    fn set_immutable(&self, path: &Path) -> bool {
        self.run_chattr("+i", path)
    }
}

/// `lsattr -d` prints the attribute set, a space, then the path:
/// `----i---------e------- /etc/passwd`.
fn parse_lsattr(output: &str) -> Option<bool> {
    let flags = output.split_whitespace().next()?;
    if !flags.chars().all(|c| c == '-' || c.is_ascii_alphabetic()) {
        return None;
    }
    Some(flags.contains('i'))
}

/// Gate for filesystems or platforms without an immutable attribute.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAttributes;

impl AttributeGate for NoAttributes {
    fn query(&self, _path: &Path) -> Option<bool> {
        Some(false)
    }

    fn clear_immutable(&self, _path: &Path) -> bool {
        true
    }

    fn set_immutable(&self, _path: &Path) -> bool {
        true
    }
}
