//! Logging setup for Clipper.
//!
//! Console output is always on. With `logging.to_file` the same lines are
//! appended to `logging.file`, so the history of reaper deletions survives
//! restarts.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::Result;

/// HTTP plumbing below our own request spans.
const QUIET_DEPENDENCIES: &str = "hyper=warn,hyper_util=warn,h2=warn";

/// Parse a configured level name. Unknown names fall back to `info`.
fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "warning" => Level::WARN,
        other => other.parse().unwrap_or(Level::INFO),
    }
}

/// `RUST_LOG` wins when set; otherwise the configured level.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(parse_level(level).into())
            .parse_lossy(QUIET_DEPENDENCIES)
    })
}

/// Open `path` for appending, creating its directory first.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Initialize logging from the `[logging]` section.
///
/// Fails only if the log file cannot be opened; nothing is installed then,
/// so the caller can fall back to [`init_console_only`].
pub fn init(config: &LoggingConfig) -> Result<()> {
    let file_layer = if config.to_file {
        let file = open_log_file(Path::new(&config.file))?;
        Some(
            fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(true),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(fmt::layer().with_writer(std::io::stdout).with_target(true))
        .with(file_layer)
        .init();

    Ok(())
}

/// Console-only logging.
pub fn init_console_only(level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_writer(std::io::stdout).with_target(true))
        .init();
}
