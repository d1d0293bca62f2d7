//! Tracing setup for the CLI.
//!
//! Events go to `$XDG_STATE_HOME/deckgen/deckgen.log`; `RUST_LOG` overrides
//! the default filter.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,deckgen=debug,deckgen_core=debug";

const LOG_FILE: &str = "deckgen.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Path of the log file; the directory is not created here.
pub fn log_file() -> Result<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("deckgen")?;
    Ok(dirs.get_state_home().join(LOG_FILE))
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

/// Install the global subscriber writing to [`log_file`].
///
/// Fails if the state directory is unusable or a subscriber is already set;
/// callers then use [`init_logging_stderr`].
pub fn init_logging() -> Result<()> {
    let path = log_file()?;
    let file = open_log(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install subscriber: {}", e))?;

    tracing::info!(path = %path.display(), "logging to file");
    Ok(())
}

/// Same filter, written to stderr. A second install is ignored.
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}
