//! Operator prompts and the stdin command reader.

use std::io::{self, BufRead, Write};

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::commands::{Command, CommandContext, CommandOutput};

pub const PASSPHRASE_ENV: &str = "WARDEN_PASSPHRASE";
pub const PROMPT: &str = "warden> ";

/// Ask a yes/no question on stdin. `assume_yes` answers without asking; end
/// of input counts as no.
pub fn confirm(question: &str, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }
    print!("{question} [y/n] ");
    let _ = io::stdout().flush();
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
    }
}

pub fn prompt_passphrase() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSPHRASE_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password("Backup passphrase: ")
        .map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    if pw.is_empty() {
        return Err(anyhow!("empty passphrase; use --no-encrypt to store backups in plaintext"));
    }
    Ok(Zeroizing::new(pw))
}

pub fn redraw_prompt() {
    print!("{PROMPT}");
    let _ = io::stdout().flush();
}

/// Feed stdin lines into a channel from a plain thread. A blocking read
/// there never holds up runtime shutdown.
fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("warden-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot start stdin reader");
    }
    rx
}

/// Read and execute commands until `exit`. End of input stops reading but
/// does not end the watchdog.
pub async fn run_command_reader(ctx: CommandContext) -> Result<()> {
    let mut lines = spawn_stdin_lines();
    redraw_prompt();
    loop {
        let Some(line) = lines.recv().await else {
            debug!("stdin closed, command reader idle");
            return std::future::pending().await;
        };
        let cmd = match Command::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => {
                redraw_prompt();
                continue;
            }
            Err(e) => {
                println!("{e:#}");
                redraw_prompt();
                continue;
            }
        };

        let worker = ctx.clone();
        match tokio::task::spawn_blocking(move || worker.execute(cmd)).await? {
            Ok(CommandOutput::Exit) => {
                info!("exit requested");
                return Ok(());
            }
            Ok(CommandOutput::Text(text)) => println!("{text}"),
            Err(e) => println!("rejected: {e:#}"),
        }
        redraw_prompt();
    }
}
