use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::LoggingConfig;

pub fn config_path(root: &Path) -> PathBuf {
    root.join("config").join("logging.json")
}

pub fn log_dir(root: &Path) -> PathBuf {
    root.join("logs")
}

/// Read `<root>/config/logging.json`, writing the defaults when it is missing
///
/// An unreadable or malformed file yields the defaults.
pub fn read_config(root: &Path) -> LoggingConfig {
    let path = config_path(root);
    match fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let cfg = LoggingConfig::default();
            let _ = write_config_atomic(root, &cfg);
            cfg
        }
        Err(_) => LoggingConfig::default(),
    }
}

pub fn write_config_atomic(root: &Path, cfg: &LoggingConfig) -> Result<()> {
    let path = config_path(root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating logging config dir {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(cfg).context("serializing logging config")?;

    let mut options = fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(&tmp_path)
        .with_context(|| format!("opening {}", tmp_path.display()))?;
    std::io::Write::write_all(&mut file, &data)
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("syncing {}", tmp_path.display()))?;

    fs::rename(&tmp_path, &path)
        .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = read_config(dir.path());

        assert_eq!(cfg, LoggingConfig::default());
        assert!(config_path(dir.path()).exists());
    }

    #[test]
    fn config_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            enabled: false,
            level: "debug".to_string(),
            keep_days: 3,
        };
        write_config_atomic(dir.path(), &cfg).unwrap();

        assert_eq!(read_config(dir.path()), cfg);
        assert!(!config_path(dir.path()).with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn config_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write_config_atomic(dir.path(), &LoggingConfig::default()).unwrap();
        let mode = fs::metadata(config_path(dir.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn malformed_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(read_config(dir.path()), LoggingConfig::default());
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"level":"trace"}"#).unwrap();

        let cfg = read_config(dir.path());
        assert_eq!(cfg.level, "trace");
        assert!(cfg.enabled);
        assert_eq!(cfg.keep_days, LoggingConfig::default().keep_days);
    }
}
