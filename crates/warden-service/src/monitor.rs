//! Perpetual watch-and-repair loop.
//!
//! Each tick walks the registry in registration order under its read lock:
//! service members (followed by a liveness check per service), standalone
//! files, then directory entries. Failed repairs are retried on the next
//! tick with no limit.

use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};
use warden_core::backup_store::BackupStore;
use warden_core::checksum::check_file;
use warden_core::liveness::{ServiceLiveness, ServiceStatus};
use warden_core::model::WatchedObject;
use warden_core::registry::SharedRegistry;
use warden_core::restore::{RepairOutcome, RestoreExecutor};
use warden_core::settings::{RuntimeSettings, SharedSettings};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub drifted: usize,
    pub repaired: usize,
    pub failed: usize,
    pub metadata_synced: usize,
    pub services_started: usize,
}

impl TickSummary {
    /// Something was reported this tick; the console prompt needs redrawing.
    pub fn changed(&self) -> bool {
        self.drifted + self.metadata_synced + self.services_started > 0
    }
}

pub struct Monitor {
    registry: SharedRegistry,
    store: Arc<BackupStore>,
    restorer: RestoreExecutor,
    liveness: ServiceLiveness,
    settings: SharedSettings,
}

impl Monitor {
    pub fn new(
        registry: SharedRegistry,
        store: Arc<BackupStore>,
        liveness: ServiceLiveness,
        settings: SharedSettings,
    ) -> Self {
        let restorer = RestoreExecutor::new(store.gate().clone());
        Self {
            registry,
            store,
            restorer,
            liveness,
            settings,
        }
    }

    /// One full pass. Blocking; run it off the async workers.
    pub fn tick(&self) -> TickSummary {
        let settings = self.settings.read().clone();
        let registry = self.registry.read();
        let mut summary = TickSummary::default();

        for triple in registry.services() {
            for (_, obj) in triple.members() {
                self.inspect(obj, &settings, &mut summary);
            }
            if settings.upkeep {
                let unit = triple.unit_name();
                if self.liveness.ensure_running(&unit) == Some(ServiceStatus::Inactive) {
                    summary.services_started += 1;
                    if settings.output_enabled {
                        warn!(name = %triple.name(), unit = %unit, "service inactive, start requested");
                    }
                }
            }
        }
        for obj in registry.files() {
            self.inspect(obj, &settings, &mut summary);
        }
        for dir in registry.directories() {
            for obj in dir.entries() {
                self.inspect(obj, &settings, &mut summary);
            }
        }
        summary
    }

    fn inspect(&self, obj: &WatchedObject, settings: &RuntimeSettings, summary: &mut TickSummary) {
        summary.checked += 1;
        let output = settings.output_enabled;

        if !check_file(obj) {
            summary.drifted += 1;
            if output {
                warn!(name = %obj.name(), path = %obj.path().display(), "content drift detected");
            }
            let outcome = self.restorer.repair(&self.store, obj);
            record(obj, &outcome, output, summary, "restored");
            return;
        }

        if !settings.check_perms {
            return;
        }
        if let Some(drift) = self.restorer.metadata_drift(obj) {
            summary.metadata_synced += 1;
            if output {
                warn!(name = %obj.name(), path = %obj.path().display(), %drift, "metadata drift detected");
            }
            let outcome = self.restorer.sync_permissions(obj);
            record(obj, &outcome, output, summary, "permissions restored");
        }
    }
}

fn record(obj: &WatchedObject, outcome: &RepairOutcome, output: bool, summary: &mut TickSummary, what: &str) {
    match outcome {
        RepairOutcome::Restored => {
            summary.repaired += 1;
            if output {
                info!(name = %obj.name(), path = %obj.path().display(), "{what}");
            }
        }
        RepairOutcome::RestoredWithoutOwnership { error } => {
            summary.repaired += 1;
            if output {
                warn!(name = %obj.name(), path = %obj.path().display(), %error, "{what} without ownership");
            }
        }
        RepairOutcome::Failed { error } => {
            summary.failed += 1;
            if output {
                error!(name = %obj.name(), path = %obj.path().display(), %error, "repair failed");
            }
        }
    }
}

pub struct MonitorHandle {
    /// Run the next tick now instead of waiting out the interval.
    pub wake: Arc<Notify>,
    /// Send `true` to stop the loop.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Spawn the monitor as a tokio task. `on_tick` sees every tick's summary.
pub fn spawn_monitor_loop<F>(monitor: Arc<Monitor>, on_tick: F) -> (tokio::task::JoinHandle<()>, MonitorHandle)
where
    F: Fn(&TickSummary) + Send + Sync + 'static,
{
    let wake = Arc::new(Notify::new());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let wake_clone = wake.clone();

    let handle = tokio::spawn(async move {
        info!(interval_ms = monitor.settings.read().interval_ms, "monitor loop started");
        loop {
            if *shutdown_rx.borrow() {
                return;
            }

            let worker = monitor.clone();
            match tokio::task::spawn_blocking(move || worker.tick()).await {
                Ok(summary) => {
                    debug!(?summary, "tick complete");
                    on_tick(&summary);
                }
                Err(e) => error!(error = %e, "monitor tick panicked"),
            }

            let interval = monitor.settings.read().interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake_clone.notified() => {
                    debug!("monitor loop woken early");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("monitor loop shutting down");
                        return;
                    }
                }
            }
        }
    });

    (handle, MonitorHandle { wake, shutdown_tx })
}
