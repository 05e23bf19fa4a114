use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden_core::attrs::{AttributeGate, Chattr, NoAttributes};
use warden_core::backup_store::BackupStore;
use warden_core::config::WatchConfig;
use warden_core::crypto::BackupKey;
use warden_core::error::ConfigError;
use warden_core::liveness::{ServiceLiveness, Systemctl};
use warden_core::paths::{self, DEFAULT_BACKUP_DIR, DEFAULT_CONFIG_FILE};
use warden_core::registry::Registry;
use warden_core::settings::{self, RuntimeSettings, DEFAULT_ICMP_INTERVAL_MS, DEFAULT_INTERVAL_MS};
use warden_service::commands::CommandContext;
use warden_service::console::{self, run_command_reader};
use warden_service::icmp::{spawn_icmp_enforcer, IcmpEnforcer};
use warden_service::monitor::{spawn_monitor_loop, Monitor};

#[derive(Parser, Debug)]
#[command(author, version, about = "Host integrity watchdog", long_about = None)]
struct WardenSettings {
    /// Watch-list configuration document
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Directory holding the trusted backups
    #[arg(short, long, default_value = DEFAULT_BACKUP_DIR)]
    backup: PathBuf,
    /// Keep trusted state in memory only
    #[arg(long)]
    no_backup: bool,
    /// Ignore existing backups and snapshot the live files
    #[arg(long)]
    no_restore: bool,
    /// Store backups in plaintext
    #[arg(long)]
    no_encrypt: bool,
    /// Start with drift reports silenced
    #[arg(short, long)]
    quiet: bool,
    /// Do not restart inactive services
    #[arg(long)]
    no_upkeep: bool,
    /// Do not check mode, ownership or the immutable flag
    #[arg(long)]
    no_perms: bool,
    /// Do not enforce icmp echo replies
    #[arg(long)]
    no_icmp: bool,
    /// Do not use lsattr/chattr
    #[arg(long)]
    no_attrs: bool,
    /// Milliseconds between integrity passes
    #[arg(short, long, default_value_t = DEFAULT_INTERVAL_MS)]
    delay: u64,
    /// Milliseconds between icmp policy checks
    #[arg(short, long, default_value_t = DEFAULT_ICMP_INTERVAL_MS)]
    icmp_delay: u64,
    /// Answer yes to startup questions
    #[arg(short, long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = WardenSettings::parse();

    let plan = load_watch_config(&cli)?.into_plan();

    let key = if cli.no_encrypt {
        None
    } else {
        let passphrase = console::prompt_passphrase()?;
        Some(BackupKey::derive(&passphrase).context("derive backup key")?)
    };

    let gate: Arc<dyn AttributeGate> = if cli.no_attrs {
        Arc::new(NoAttributes)
    } else {
        Arc::new(Chattr::new())
    };

    let mut store = BackupStore::new(&cli.backup, key, gate)
        .with_persist(!cli.no_backup)
        .with_load_from_backup(!cli.no_restore);
    if store.persists() && store.load_from_backup() && cli.backup.is_dir() {
        let question = format!("Backups found in {}. Load from backup?", cli.backup.display());
        if !console::confirm(&question, cli.yes) {
            store.set_load_from_backup(false);
        }
    }
    if !store.persists() {
        store.set_load_from_backup(false);
    }
    store
        .prepare()
        .with_context(|| format!("prepare backup root {}", cli.backup.display()))?;
    let store = Arc::new(store);

    let registry = Registry::load(plan, &store)
        .context("load watch list")?
        .into_shared();
    if registry.read().is_empty() {
        warn!("nothing to watch; add entries with addfile, addfolder or addservice");
    }

    let settings = settings::shared(RuntimeSettings {
        interval_ms: cli.delay.max(1),
        icmp_interval_ms: cli.icmp_delay.max(1),
        output_enabled: !cli.quiet,
        check_perms: !cli.no_perms,
        upkeep: !cli.no_upkeep,
    });

    let monitor = Arc::new(Monitor::new(
        registry.clone(),
        store.clone(),
        ServiceLiveness::new(Box::new(Systemctl::new())),
        settings.clone(),
    ));
    let redraw_settings = settings.clone();
    let (monitor_task, monitor_handle) = spawn_monitor_loop(monitor, move |summary| {
        if summary.changed() && redraw_settings.read().output_enabled {
            console::redraw_prompt();
        }
    });

    let icmp_task = if cli.no_icmp || !cfg!(target_os = "linux") {
        None
    } else {
        Some(spawn_icmp_enforcer(
            IcmpEnforcer::default(),
            settings.clone(),
            monitor_handle.shutdown_tx.subscribe(),
        ))
    };

    let ctx = CommandContext {
        registry,
        store,
        settings,
        wake: monitor_handle.wake.clone(),
    };
    let reader = tokio::spawn(run_command_reader(ctx));

    info!("watchdog started");
    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("install ctrl-c handler")?;
            info!("interrupted, stopping");
        }
        res = reader => {
            res.map_err(|e| anyhow!("command reader: {e}"))??;
        }
    }

    let _ = monitor_handle.shutdown_tx.send(true);
    monitor_task.abort();
    if let Some(task) = icmp_task {
        task.abort();
    }
    info!("watchdog stopped");
    Ok(())
}

/// Open the configured document, offering the built-in watch list when it
/// cannot be opened.
fn load_watch_config(cli: &WardenSettings) -> Result<WatchConfig> {
    let path = paths::resolve_config(&cli.config);
    match WatchConfig::load(&path) {
        Ok(cfg) => {
            info!(path = %path.display(), "configuration loaded");
            Ok(cfg)
        }
        Err(ConfigError::Open { path, source }) => {
            warn!(path = %path.display(), error = %source, "cannot open configuration");
            if console::confirm("Use the built-in default configuration?", cli.yes) {
                Ok(WatchConfig::builtin()?)
            } else {
                Err(anyhow!("no configuration at {}", path.display()))
            }
        }
        Err(e) => Err(e).with_context(|| format!("parse {}", path.display())),
    }
}
