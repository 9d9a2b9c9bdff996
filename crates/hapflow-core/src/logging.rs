//! Logging configuration
//!
//! Describes where and how verbosely the player logs. The subscriber itself is
//! installed by the binary; this crate only owns the settings and the log file
//! housekeeping.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// Prefix of log files written by the player
const LOG_FILE_PREFIX: &str = "hapflow_";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for log files
    pub log_directory: PathBuf,
    /// Number of log files to keep; older ones are deleted on startup
    pub max_log_files: usize,
    /// Write logs to stderr
    pub console_output: bool,
    /// Write logs to a timestamped file in `log_directory`
    pub file_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_directory: default_log_directory(),
            max_log_files: 10,
            console_output: true,
            file_output: false,
        }
    }
}

fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("hapflow").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

impl LogConfig {
    /// Parse the configured level, falling back to INFO
    pub fn parse_level(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::INFO)
    }

    /// Create the log directory if it is missing
    pub fn ensure_log_directory(&self) -> io::Result<()> {
        fs::create_dir_all(&self.log_directory)
    }

    /// Path of the log file for the current session
    pub fn current_log_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.log_directory
            .join(format!("{}{}.log", LOG_FILE_PREFIX, stamp))
    }

    /// Delete the oldest log files so that at most `max_log_files - 1` remain,
    /// leaving room for the file of the current session
    pub fn cleanup_old_logs(&self) -> io::Result<usize> {
        if !self.log_directory.exists() {
            return Ok(0);
        }

        let mut logs: Vec<PathBuf> = fs::read_dir(&self.log_directory)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "log")
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
            })
            .collect();

        // Timestamped names sort chronologically
        logs.sort();

        let keep = self.max_log_files.saturating_sub(1);
        let excess = logs.len().saturating_sub(keep);
        for path in &logs[..excess] {
            fs::remove_file(path)?;
        }
        Ok(excess)
    }
}
