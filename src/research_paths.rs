//! Centralized home-based storage paths for research persistence.
//!
//! Everything lives under `~/.deep-research/` (or `$DEEP_RESEARCH_HOME`):
//! - `sessions/<id>/events.jsonl` - Event log of one research session
//! - `sessions/<id>/snapshot.json` - Latest snapshot of that session
//! - `sessions/<id>/logs/run.jsonl` - Structured audit trail
//! - `config.yaml` - Orchestrator configuration

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// The name of the research home directory.
const RESEARCH_HOME_DIR: &str = ".deep-research";

/// Environment variable overriding the home directory.
pub const RESEARCH_HOME_ENV: &str = "DEEP_RESEARCH_HOME";

/// Returns the research home directory without creating it.
///
/// `$DEEP_RESEARCH_HOME` wins when set and non-empty.
pub fn research_home() -> Result<PathBuf> {
    resolve_home(std::env::var_os(RESEARCH_HOME_ENV), dirs::home_dir())
}

fn resolve_home(override_dir: Option<OsString>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = override_dir.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = home.context("Could not determine home directory for research storage")?;
    Ok(home.join(RESEARCH_HOME_DIR))
}

/// Returns the research home directory, creating it if needed.
///
/// # Errors
///
/// Returns an error if:
/// - Home directory cannot be determined
/// - Directory creation fails
pub fn research_home_dir() -> Result<PathBuf> {
    let dir = research_home()?;
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create research directory: {}", dir.display()))?;
    Ok(dir)
}

/// Default event store root: `<home>/sessions/`
pub fn default_store_dir() -> Result<PathBuf> {
    Ok(research_home()?.join("sessions"))
}

/// Default configuration file: `<home>/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(research_home()?.join("config.yaml"))
}

/// Structured log directory of one session: `<store>/<id>/logs/`
pub fn session_logs_dir(store_dir: &Path, session_id: &str) -> PathBuf {
    store_dir.join(session_id).join("logs")
}

#[cfg(test)]
#[path = "tests/research_paths_tests.rs"]
mod tests;
