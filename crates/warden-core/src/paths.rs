use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "warden";
pub const APP_NAME: &str = "warden";

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_BACKUP_DIR: &str = ".warden";

pub fn config_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine config directory"))?;
    Ok(dirs.config_dir().to_path_buf())
}

/// The configuration file to open. A default `config.json` missing from the
/// working directory falls back to the per-user config directory.
pub fn resolve_config(requested: &Path) -> PathBuf {
    if requested.exists() || requested != Path::new(DEFAULT_CONFIG_FILE) {
        return requested.to_path_buf();
    }
    match config_dir() {
        Ok(dir) if dir.join(DEFAULT_CONFIG_FILE).is_file() => dir.join(DEFAULT_CONFIG_FILE),
        _ => requested.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_is_kept() {
        let p = Path::new("/nonexistent/custom.json");
        assert_eq!(resolve_config(p), p);
    }
}
