//! Subscriber installation for the `hapflow` binary
//!
//! Command output goes to stdout, so log lines are written to stderr and,
//! when `file_output` is set, to a session file under `log_directory`.

use anyhow::{Context, Result};
use hapflow_core::LogConfig;
use std::fs::File;
use std::path::PathBuf;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

/// Flushes the session log file when dropped
pub struct LogGuard {
    _worker: WorkerGuard,
    pub path: PathBuf,
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` replaces the configured level when set.
pub fn init(config: &LogConfig) -> Result<Option<LogGuard>> {
    let directives = filter_directives(config, std::env::var("RUST_LOG").ok().as_deref());
    let filter = || EnvFilter::builder().parse_lossy(&directives);

    let console = config
        .console_output
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false).with_filter(filter()));

    let (file_layer, guard, pruned) = if config.file_output {
        let (writer, guard, pruned) = open_session_file(config)?;
        // Decode work runs on rayon threads
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_names(true)
            .with_filter(filter());
        (Some(layer), Some(guard), pruned)
    } else {
        (None, None, 0)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("A tracing subscriber is already installed")?;

    tracing::debug!("Log filter: {}", directives);
    if let Some(guard) = &guard {
        tracing::info!(
            "Writing log to {} ({} old log(s) removed)",
            guard.path.display(),
            pruned
        );
    }
    Ok(guard)
}

/// Directives for the filter: `RUST_LOG` if non-empty, else the config level
fn filter_directives(config: &LogConfig, env: Option<&str>) -> String {
    match env.map(str::trim).filter(|directives| !directives.is_empty()) {
        Some(directives) => directives.to_string(),
        None => config.parse_level().to_string().to_lowercase(),
    }
}

fn open_session_file(config: &LogConfig) -> Result<(NonBlocking, LogGuard, usize)> {
    config.ensure_log_directory().with_context(|| {
        format!("Failed to create log directory {}", config.log_directory.display())
    })?;
    // Pruning is housekeeping; a locked old file must not stop playback
    let pruned = config.cleanup_old_logs().unwrap_or(0);

    let path = config.current_log_path();
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;
    let (writer, worker) = tracing_appender::non_blocking(file);
    Ok((
        writer,
        LogGuard {
            _worker: worker,
            path,
        },
        pruned,
    ))
}
