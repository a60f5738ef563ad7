// ABOUTME: tracing subscriber setup for hosts embedding the pool
//
// Logs go either to a JSON Lines file (one per process start) or to stderr.
// RUST_LOG overrides the configured filter.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Filter used when RUST_LOG is not set
pub const DEFAULT_FILTER: &str = "provider_pool=info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives
    pub filter: String,

    /// Directory for JSON Lines log files; stderr when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            log_dir: None,
        }
    }
}

impl LogConfig {
    /// Log to JSON files under `~/.provider-pool/logs`
    pub fn to_default_dir() -> Self {
        let log_dir = dirs::home_dir()
            .map(|home| home.join(".provider-pool").join("logs"))
            .unwrap_or_else(|| PathBuf::from(".provider-pool/logs"));

        Self {
            log_dir: Some(log_dir),
            ..Self::default()
        }
    }
}

/// Install the global subscriber
///
/// Returns the log file path when logging to a directory.
///
/// # Errors
///
/// Fails if the log file cannot be created or a global subscriber is
/// already installed.
pub fn init(config: &LogConfig) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .with_context(|| format!("Invalid log filter '{}'", config.filter))?;

    let Some(log_dir) = &config.log_dir else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(None);
    };

    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let log_file = log_file_path(log_dir);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to create log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(Some(log_file))
}

/// Timestamped JSONL file name inside `dir`
fn log_file_path(dir: &Path) -> PathBuf {
    dir.join(format!(
        "provider-pool-{}.jsonl",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ))
}
