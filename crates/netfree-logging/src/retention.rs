use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

use crate::config::LoggingConfig;
use crate::fs::log_dir;

const MAX_LOG_BYTES: u64 = 200 * 1024 * 1024;

struct LogFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

/// Delete logs older than `keep_days`, then the oldest until under the size cap
pub fn run_retention(root: &Path, cfg: &LoggingConfig) -> Result<()> {
    prune(&log_dir(root), cfg.keep_days, MAX_LOG_BYTES)
}

fn prune(dir: &Path, keep_days: u64, max_bytes: u64) -> Result<()> {
    let mut entries = collect_log_files(dir)?;

    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(keep_days.saturating_mul(24 * 60 * 60)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    entries.retain(|entry| {
        if entry.modified >= cutoff {
            return true;
        }
        match fs::remove_file(&entry.path) {
            Ok(()) => false,
            Err(err) => {
                tracing::warn!("Failed to remove old log {}: {}", entry.path.display(), err);
                true
            }
        }
    });

    let mut total_size: u64 = entries.iter().map(|e| e.size).sum();
    if total_size <= max_bytes {
        return Ok(());
    }

    entries.sort_by_key(|e| e.modified);
    for entry in entries {
        if total_size <= max_bytes {
            break;
        }
        if let Err(err) = fs::remove_file(&entry.path) {
            tracing::warn!(
                "Failed to remove log {} during size cap cleanup: {}",
                entry.path.display(),
                err
            );
            continue;
        }
        total_size = total_size.saturating_sub(entry.size);
    }

    Ok(())
}

fn collect_log_files(dir: &Path) -> Result<Vec<LogFile>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }

    let entries = fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("iterating {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_log_name(name) {
            continue;
        }

        let metadata = fs::metadata(&path).with_context(|| format!("stat {}", path.display()))?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push(LogFile {
            path,
            modified,
            size: metadata.len(),
        });
    }

    Ok(files)
}

// Rolling appenders suffix the date: netfree.log.2024-05-01
fn is_log_name(name: &str) -> bool {
    name.ends_with(".log") || name.contains(".log.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_rolled_logs() {
        assert!(is_log_name("netfree.log"));
        assert!(is_log_name("capture.log.2024-05-01"));
        assert!(!is_log_name("logging.json"));
        assert!(!is_log_name("notes.txt"));
    }

    #[test]
    fn missing_log_dir_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        run_retention(dir.path(), &LoggingConfig::default()).unwrap();
    }

    #[test]
    fn size_cap_removes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("netfree.log.2024-01-01");
        fs::write(&old, vec![0u8; 64]).unwrap();
        // Make sure the second file has a later mtime
        std::thread::sleep(Duration::from_millis(20));
        let new = dir.path().join("netfree.log.2024-01-02");
        fs::write(&new, vec![0u8; 64]).unwrap();
        let other = dir.path().join("keep.txt");
        fs::write(&other, vec![0u8; 512]).unwrap();

        prune(dir.path(), 30, 100).unwrap();

        assert!(!old.exists());
        assert!(new.exists());
        assert!(other.exists());
    }

    #[test]
    fn zero_keep_days_expires_everything() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("capture.log");
        fs::write(&log, b"x").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        prune(dir.path(), 0, MAX_LOG_BYTES).unwrap();
        assert!(!log.exists());
    }
}
