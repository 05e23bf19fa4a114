//! Keeps ICMP echo replies enabled.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::{info, warn};
use warden_core::settings::SharedSettings;

pub const ECHO_IGNORE_ALL: &str = "/proc/sys/net/ipv4/icmp_echo_ignore_all";

pub struct IcmpEnforcer {
    knob: PathBuf,
}

impl IcmpEnforcer {
    pub fn new(knob: impl Into<PathBuf>) -> Self {
        Self { knob: knob.into() }
    }

    pub fn knob(&self) -> &Path {
        &self.knob
    }

    /// Reset the knob to `0` when it holds anything else. Returns whether a
    /// reset happened.
    pub fn enforce_once(&self) -> io::Result<bool> {
        let current = fs::read_to_string(&self.knob)?;
        if current.trim() == "0" {
            return Ok(false);
        }
        fs::write(&self.knob, "0\n")?;
        Ok(true)
    }
}

impl Default for IcmpEnforcer {
    fn default() -> Self {
        Self::new(ECHO_IGNORE_ALL)
    }
}

pub fn spawn_icmp_enforcer(
    enforcer: IcmpEnforcer,
    settings: SharedSettings,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(knob = %enforcer.knob().display(), "icmp enforcer started");
        let mut failing = false;
        loop {
            match enforcer.enforce_once() {
                Ok(true) => {
                    if settings.read().output_enabled {
                        warn!("icmp echo replies were disabled; re-enabled");
                    }
                    failing = false;
                }
                Ok(false) => failing = false,
                Err(e) => {
                    if !failing {
                        warn!(knob = %enforcer.knob().display(), error = %e, "cannot enforce icmp policy");
                    }
                    failing = true;
                }
            }

            let interval = settings.read().icmp_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resets_nonzero_knob() {
        let dir = tempdir().unwrap();
        let knob = dir.path().join("icmp_echo_ignore_all");
        fs::write(&knob, "1\n").unwrap();
        let enforcer = IcmpEnforcer::new(&knob);

        assert!(enforcer.enforce_once().unwrap());
        assert_eq!(fs::read_to_string(&knob).unwrap().trim(), "0");
        assert!(!enforcer.enforce_once().unwrap());
    }

    #[test]
    fn missing_knob_is_an_error() {
        let dir = tempdir().unwrap();
        let enforcer = IcmpEnforcer::new(dir.path().join("absent"));
        assert!(enforcer.enforce_once().is_err());
    }
}
