//! # Logger Setup
//!
//! Installs the process-wide `tracing` subscriber for a coinfetch tool:
//! human readable output on stderr and, when a log directory is given, a
//! plain-text log file `<log_dir>/<app_name>-<timestamp>.log`.
//!
//! Before a new log file is opened, older files of the same application are
//! rotated away so that only the most recent previous run is kept next to the
//! current one.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use glob::glob;
use thiserror::Error;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timestamp format of log file names; sorts chronologically as text.
const FILE_TIMESTAMP: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid log file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Invalid log level {level:?}: {reason}")]
    Filter { level: String, reason: String },
    #[error("A global logger is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// # Log Options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Level or filter directives used when `RUST_LOG` is not set.
    pub level: String,
    /// Directory for log files; console only when `None`.
    pub log_dir: Option<PathBuf>,
    /// Colored console output.
    pub ansi: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            ansi: true,
        }
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `options.level`. The returned guard flushes the file
/// writer on drop and must be held until the program exits; it is `None`
/// when no log directory was given.
pub fn init_logging(app_name: &str, options: &LogOptions) -> Result<Option<WorkerGuard>, LogError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.level).map_err(|e| LogError::Filter {
            level: options.level.clone(),
            reason: e.to_string(),
        })?,
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(options.ansi)
        .with_target(false);

    let (file_layer, guard, log_file) = match &options.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|source| LogError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            let removed = rotate_logs(app_name, dir)?;

            let file_name = log_file_name(app_name);
            let appender = tracing_appender::rolling::never(dir, &file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard), Some((dir.join(file_name), removed)))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if let Some((path, removed)) = log_file {
        info!(path = %path.display(), rotated = removed.len(), "logging to file");
    }
    Ok(guard)
}

/// `<app_name>-<local timestamp>.log`
pub fn log_file_name(app_name: &str) -> String {
    format!("{app_name}-{}.log", Local::now().format(FILE_TIMESTAMP))
}

/// Deletes all log files of `app_name` in `log_dir` except the newest one.
///
/// Returns the files that were removed. Files that cannot be deleted are
/// reported and skipped.
pub fn rotate_logs(app_name: &str, log_dir: &Path) -> Result<Vec<PathBuf>, LogError> {
    let pattern = log_dir.join(format!("{app_name}-*.log"));
    let mut log_files: Vec<PathBuf> = glob(&pattern.to_string_lossy())?
        .filter_map(Result::ok)
        .collect();

    // Newest first; names embed a sortable timestamp
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = Vec::new();
    for old_file in log_files.into_iter().skip(1) {
        match fs::remove_file(&old_file) {
            Ok(()) => removed.push(old_file),
            Err(e) => warn!(path = %old_file.display(), error = %e, "could not delete old log file"),
        }
    }
    Ok(removed)
}
