//! Log setup: human-readable lines on stderr plus a timestamped file under
//! the configured log directory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// `<dir>/posecast_<YYYYmmdd_HHMMSS>.log`
pub fn log_file_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("posecast_{}.log", now.format("%Y%m%d_%H%M%S")))
}

fn open_log_file(dir: &Path) -> Result<(File, PathBuf)> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create log dir {}", dir.display()))?;
    let path = log_file_path(dir, Local::now());
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok((file, path))
}

/// Install the global subscriber. `RUST_LOG` overrides `config.filter`.
/// Returns the log file path.
pub fn init(config: &LoggingConfig) -> Result<PathBuf> {
    let (file, path) = open_log_file(Path::new(&config.dir))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .with_context(|| format!("invalid log filter {:?}", config.filter))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;

    tracing::info!("Log: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let path = log_file_path(Path::new("logs"), now);
        assert_eq!(path, Path::new("logs").join("posecast_20240309_070501.log"));
    }

    #[test]
    fn test_open_log_file_creates_dir() {
        let dir = std::env::temp_dir().join(format!("posecast_log_test_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let (_file, path) = open_log_file(&dir).unwrap();
        assert!(path.exists());
        assert!(path.starts_with(&dir));
        fs::remove_dir_all(&dir).unwrap();
    }
}
