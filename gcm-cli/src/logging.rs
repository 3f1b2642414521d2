//! Logging setup.
//!
//! stdout carries the credential protocol, so diagnostics go to stderr.
//! With `credential.writelog` set, everything from debug up is also appended
//! to `credential.log` in the repository's git directory.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::{filter_fn, FilterExt, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::protocol::CONFIG_PREFIX;

/// Environment variable holding the stderr filter directives.
pub const LOG_ENV: &str = "GCM_LOG";

/// Target of the event recording why the helper quit. It is printed to
/// stderr separately, so only the trace log receives it.
pub const FATAL_TARGET: &str = "fatal";

/// Size past which the log is moved aside before a new run appends to it.
pub const LOG_FILE_MAX_LENGTH: u64 = 8 * 1024 * 1024;

/// Install the global subscriber.
///
/// `log_dir` enables the trace log in that directory.
pub fn init(log_dir: Option<&Path>) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter.and(filter_fn(|metadata| metadata.target() != FATAL_TARGET)));

    let (log_file, file_error) = match log_dir.map(open_log_file).transpose() {
        Ok(file) => (file, None),
        Err(e) => (None, Some(e)),
    };
    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(LevelFilter::DEBUG)
    });

    // A second initialization only happens in tests; keep the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    if let Some(e) = file_error {
        tracing::warn!("trace logging disabled: {:#}", e);
    }
}

/// `credential.log` in `git_dir`.
pub fn log_file_path(git_dir: &Path) -> PathBuf {
    git_dir.join(format!("{}.log", CONFIG_PREFIX))
}

/// Open the trace log for appending, rotating it first if it grew too large,
/// and write the run header.
pub fn open_log_file(git_dir: &Path) -> Result<File> {
    let path = log_file_path(git_dir);
    rotate(git_dir, &path, LOG_FILE_MAX_LENGTH)?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    writeln!(file)?;
    writeln!(
        file,
        "Log Start ({})",
        chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%:z")
    )?;
    writeln!(
        file,
        "{} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )?;
    Ok(file)
}

/// Move `path` to the first free `credentialNNN.log` if it exceeds `max_length`.
///
/// Returns where it was moved.
pub fn rotate(git_dir: &Path, path: &Path, max_length: u64) -> Result<Option<PathBuf>> {
    let length = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(_) => return Ok(None),
    };
    if length <= max_length {
        return Ok(None);
    }

    for i in 1..=999 {
        let candidate = git_dir.join(format!("{}{:03}.log", CONFIG_PREFIX, i));
        if !candidate.is_file() {
            fs::rename(path, &candidate)
                .with_context(|| format!("failed to move {}", path.display()))?;
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}
