//! Interactive command surface.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::Notify;
use tracing::info;
use warden_core::backup_store::BackupStore;
use warden_core::config::{DirectorySpec, FileSpec, ServiceSpec};
use warden_core::registry::{self, SharedRegistry};
use warden_core::settings::{SharedSettings, DEFAULT_ICMP_INTERVAL_MS, DEFAULT_INTERVAL_MS};

pub const HELP: &str = "\
commands:
  list                                      show watched services, files and directories
  checksums                                 show the trusted digest of every watched object
  addfile <name> <path>                     watch a file
  addfolder <name> <path>                   watch a directory tree
  addservice <name> <binary> <unit> <config>
                                            watch a service's binary, unit file and config
  free <name|path>...                       stop watching and drop the backups
  interval <ms|default>                     time between integrity passes
  icmpinterval <ms|default>                 time between icmp policy checks
  quiet | verbose                           silence or resume drift reports
  upkeep on|off                             restart inactive services
  perms on|off                              check mode, ownership and immutable flag
  help                                      this text
  exit                                      stop the watchdog";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Checksums,
    AddFile { name: String, path: String },
    AddFolder { name: String, path: String },
    AddService {
        name: String,
        binary: String,
        unit: String,
        config: String,
    },
    Free(Vec<String>),
    /// `None` restores the default.
    Interval(Option<u64>),
    IcmpInterval(Option<u64>),
    Quiet,
    Verbose,
    Upkeep(bool),
    Perms(bool),
    Help,
    Exit,
}

impl Command {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<String> = words.map(str::to_string).collect();
        let verb = verb.to_ascii_lowercase();

        let cmd = match (verb.as_str(), args.as_slice()) {
            ("list", []) => Self::List,
            ("checksums", []) => Self::Checksums,
            ("addfile", [name, path]) => Self::AddFile {
                name: name.clone(),
                path: path.clone(),
            },
            ("addfolder", [name, path]) => Self::AddFolder {
                name: name.clone(),
                path: path.clone(),
            },
            ("addservice", [name, binary, unit, config]) => Self::AddService {
                name: name.clone(),
                binary: binary.clone(),
                unit: unit.clone(),
                config: config.clone(),
            },
            ("free", keys) if !keys.is_empty() => Self::Free(keys.to_vec()),
            ("interval", [ms]) => Self::Interval(parse_ms(ms)?),
            ("icmpinterval", [ms]) => Self::IcmpInterval(parse_ms(ms)?),
            ("quiet", []) => Self::Quiet,
            ("verbose", []) => Self::Verbose,
            ("upkeep", [flag]) => Self::Upkeep(parse_toggle(flag)?),
            ("perms", [flag]) => Self::Perms(parse_toggle(flag)?),
            ("help", _) => Self::Help,
            ("exit", []) => Self::Exit,
            (
                "list" | "checksums" | "addfile" | "addfolder" | "addservice" | "free" | "interval"
                | "icmpinterval" | "quiet" | "verbose" | "upkeep" | "perms" | "exit",
                _,
            ) => bail!("wrong arguments for {verb}; try help"),
            _ => bail!("unknown command {verb}; try help"),
        };
        Ok(Some(cmd))
    }
}

fn parse_ms(arg: &str) -> Result<Option<u64>> {
    if arg.eq_ignore_ascii_case("default") {
        return Ok(None);
    }
    let ms: u64 = arg
        .parse()
        .with_context(|| format!("{arg} is not a number of milliseconds"))?;
    if ms == 0 {
        bail!("interval must be at least 1 ms");
    }
    Ok(Some(ms))
}

fn parse_toggle(arg: &str) -> Result<bool> {
    match arg.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => Err(anyhow!("expected on or off, got {other}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Text(String),
    Exit,
}

/// Everything a command may touch.
#[derive(Clone)]
pub struct CommandContext {
    pub registry: SharedRegistry,
    pub store: Arc<BackupStore>,
    pub settings: SharedSettings,
    /// Wakes the monitor after a change it should see right away.
    pub wake: Arc<Notify>,
}

impl CommandContext {
    /// Run `cmd`. Blocking: snapshots and lock waits happen inline. An `Err`
    /// is a rejection; the watchdog keeps running.
    pub fn execute(&self, cmd: Command) -> Result<CommandOutput> {
        let text = match cmd {
            Command::Exit => return Ok(CommandOutput::Exit),
            Command::Help => HELP.to_string(),
            Command::List => self.list(),
            Command::Checksums => self.checksums(),
            Command::AddFile { name, path } => {
                self.reject_taken(&name)?;
                let spec = FileSpec {
                    name,
                    path: absolute(&path)?,
                };
                let obj = registry::capture_file(&self.store, &spec)?;
                self.registry.write().insert_file(obj)?;
                info!(name = %spec.name, path = %spec.path.display(), "file added");
                self.wake.notify_one();
                format!("watching file {} at {}", spec.name, spec.path.display())
            }
            Command::AddFolder { name, path } => {
                self.reject_taken(&name)?;
                let spec = DirectorySpec {
                    name,
                    path: absolute(&path)?,
                    recursive: true,
                };
                let dir = registry::capture_directory(&self.store, &spec)?;
                let count = dir.entries().len();
                self.registry.write().insert_directory(dir)?;
                info!(name = %spec.name, path = %spec.path.display(), entries = count, "directory added");
                self.wake.notify_one();
                format!(
                    "watching directory {} at {} ({count} entries)",
                    spec.name,
                    spec.path.display()
                )
            }
            Command::AddService {
                name,
                binary,
                unit,
                config,
            } => {
                self.reject_taken(&name)?;
                let spec = ServiceSpec {
                    name,
                    binary: absolute(&binary)?,
                    unit: absolute(&unit)?,
                    config: absolute(&config)?,
                };
                let triple = registry::capture_service(&self.store, &spec)?;
                let unit_name = triple.unit_name();
                self.registry.write().insert_service(triple)?;
                info!(name = %spec.name, unit = %unit_name, "service added");
                self.wake.notify_one();
                format!("watching service {} ({unit_name})", spec.name)
            }
            Command::Free(keys) => {
                let mut out = String::new();
                let mut removed = 0;
                {
                    let mut reg = self.registry.write();
                    for key in &keys {
                        match reg.remove(key, &self.store) {
                            Some(r) => {
                                removed += 1;
                                let _ = writeln!(out, "freed {} {} ({} objects)", r.kind, r.name, r.objects);
                            }
                            None => {
                                let _ = writeln!(out, "nothing watched as {key}");
                            }
                        }
                    }
                }
                if removed == 0 {
                    bail!("{}", out.trim_end());
                }
                out.trim_end().to_string()
            }
            Command::Interval(ms) => {
                let ms = ms.unwrap_or(DEFAULT_INTERVAL_MS);
                self.settings.write().interval_ms = ms;
                self.wake.notify_one();
                format!("interval set to {ms} ms")
            }
            Command::IcmpInterval(ms) => {
                let ms = ms.unwrap_or(DEFAULT_ICMP_INTERVAL_MS);
                self.settings.write().icmp_interval_ms = ms;
                format!("icmp interval set to {ms} ms")
            }
            Command::Quiet => {
                self.settings.write().output_enabled = false;
                "output disabled".to_string()
            }
            Command::Verbose => {
                self.settings.write().output_enabled = true;
                "output enabled".to_string()
            }
            Command::Upkeep(on) => {
                self.settings.write().upkeep = on;
                format!("service upkeep {}", if on { "on" } else { "off" })
            }
            Command::Perms(on) => {
                self.settings.write().check_perms = on;
                format!("permission checking {}", if on { "on" } else { "off" })
            }
        };
        Ok(CommandOutput::Text(text))
    }

    fn reject_taken(&self, name: &str) -> Result<()> {
        self.registry.read().ensure_unique(name)?;
        Ok(())
    }

    fn list(&self) -> String {
        let reg = self.registry.read();
        let mut out = String::new();
        let _ = writeln!(out, "services:");
        for s in reg.services() {
            let _ = writeln!(out, "  {} ({})", s.name(), s.unit_name());
            for (member, obj) in s.members() {
                let _ = writeln!(out, "      {member:<8} {}", obj.path().display());
            }
        }
        let _ = writeln!(out, "files:");
        for f in reg.files() {
            let _ = writeln!(out, "  {}  {}", f.name(), f.path().display());
        }
        let _ = write!(out, "directories:");
        for d in reg.directories() {
            let _ = write!(
                out,
                "\n  {}  {}  ({} entries{})",
                d.name(),
                d.root().display(),
                d.entries().len(),
                if d.recursive() { ", recursive" } else { "" }
            );
        }
        out
    }

    fn checksums(&self) -> String {
        let reg = self.registry.read();
        let mut out = String::new();
        for obj in reg.objects() {
            let _ = writeln!(
                out,
                "{:<64}  {:04o} {}:{}  {}",
                obj.digest().unwrap_or("<directory>"),
                obj.meta().mode,
                obj.meta().uid,
                obj.meta().gid,
                obj.path().display()
            );
        }
        if out.is_empty() {
            return "nothing watched".to_string();
        }
        out.trim_end().to_string()
    }
}

fn absolute(path: &str) -> Result<PathBuf> {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()
        .context("resolve working directory")?
        .join(path))
}
