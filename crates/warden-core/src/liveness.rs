//! Service liveness through the OS service manager.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info};

use crate::error::ServiceManagerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Active,
    Inactive,
}

pub trait ServiceManager: Send + Sync {
    fn status(&self, unit: &str) -> Result<ServiceStatus, ServiceManagerError>;

    /// Ask the manager to start `unit`. Success only means the request was
    /// issued.
    fn start(&self, unit: &str) -> Result<(), ServiceManagerError>;
}

/// `systemctl is-active` / `systemctl start`.
pub struct Systemctl {
    program: PathBuf,
}

impl Systemctl {
    pub fn new() -> Self {
        Self::with_program(which::which("systemctl").unwrap_or_else(|_| PathBuf::from("systemctl")))
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for Systemctl {
    fn status(&self, unit: &str) -> Result<ServiceStatus, ServiceManagerError> {
        let output = Command::new(&self.program)
            .arg("is-active")
            .arg(unit)
            .stderr(Stdio::null())
            .output()
            .map_err(|e| ServiceManagerError::Unavailable(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        interpret_is_active(output.status.code(), &stdout)
    }

    /// `--no-block` queues the job and returns, so the child is reaped
    /// without waiting for the unit to come up.
    fn start(&self, unit: &str) -> Result<(), ServiceManagerError> {
        let status = Command::new(&self.program)
            .args(["start", "--no-block", unit])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| ServiceManagerError::Unavailable(e.to_string()))?;
        if !status.success() {
            debug!(unit, %status, "start request rejected");
        }
        Ok(())
    }
}

/// Any exit status other than 0 with `active` means the unit is down. Only a
/// manager killed by a signal counts as unavailable.
fn interpret_is_active(code: Option<i32>, stdout: &str) -> Result<ServiceStatus, ServiceManagerError> {
    match code {
        Some(0) if stdout.trim() == "active" => Ok(ServiceStatus::Active),
        Some(_) => Ok(ServiceStatus::Inactive),
        None => Err(ServiceManagerError::Unavailable("terminated by signal".into())),
    }
}

/// Liveness checks with a process-wide circuit breaker: the first time the
/// manager cannot be invoked, all further checks are disabled.
pub struct ServiceLiveness {
    manager: Box<dyn ServiceManager>,
    tripped: AtomicBool,
}

impl ServiceLiveness {
    pub fn new(manager: Box<dyn ServiceManager>) -> Self {
        Self {
            manager,
            tripped: AtomicBool::new(false),
        }
    }

    pub fn disabled(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    /// Check `unit` and request a start when it is down. Returns the status
    /// observed, or `None` when checks are disabled.
    pub fn ensure_running(&self, unit: &str) -> Option<ServiceStatus> {
        if self.disabled() {
            return None;
        }
        let status = match self.manager.status(unit) {
            Ok(s) => s,
            Err(e) => {
                self.trip(&e);
                return None;
            }
        };
        if status == ServiceStatus::Inactive {
            debug!(unit, "service inactive, requesting start");
            if let Err(e) = self.manager.start(unit) {
                self.trip(&e);
            }
        }
        Some(status)
    }

    fn trip(&self, e: &ServiceManagerError) {
        if !self.tripped.swap(true, Ordering::Relaxed) {
            error!(error = %e, "service manager unavailable; liveness checks disabled");
        } else {
            info!(error = %e, "service manager still unavailable");
        }
    }
}
