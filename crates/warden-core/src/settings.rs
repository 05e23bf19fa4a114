use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_ICMP_INTERVAL_MS: u64 = 10;

/// Knobs the operator can flip while the watchdog runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub interval_ms: u64,
    pub icmp_interval_ms: u64,
    /// Report drift and repairs.
    pub output_enabled: bool,
    /// Compare mode, ownership and the immutable flag when content matches.
    pub check_perms: bool,
    /// Restart inactive services.
    pub upkeep: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            icmp_interval_ms: DEFAULT_ICMP_INTERVAL_MS,
            output_enabled: true,
            check_perms: true,
            upkeep: true,
        }
    }
}

impl RuntimeSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn icmp_interval(&self) -> Duration {
        Duration::from_millis(self.icmp_interval_ms.max(1))
    }
}

pub type SharedSettings = Arc<RwLock<RuntimeSettings>>;

pub fn shared(settings: RuntimeSettings) -> SharedSettings {
    Arc::new(RwLock::new(settings))
}
