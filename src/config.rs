use crate::research_paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Orchestrator settings. Every field has a default so partial YAML files work.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Event store root. Default: `~/.deep-research/sessions`
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Save a snapshot whenever the version is a multiple of this (0 = never). Default: 20
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Cap on search workers running at once (0 = unlimited).
    #[serde(default)]
    pub max_concurrent_workers: usize,
    /// Write a per-session JSONL audit trail of commands and events.
    #[serde(default)]
    pub structured_log: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            snapshot_every: default_snapshot_every(),
            max_concurrent_workers: 0,
            structured_log: false,
        }
    }
}

fn default_store_dir() -> PathBuf {
    research_paths::default_store_dir().unwrap_or_else(|_| PathBuf::from(".deep-research/sessions"))
}

fn default_snapshot_every() -> u64 {
    20
}

impl OrchestratorConfig {
    /// Loads configuration from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))
            }
        };
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        Ok(config)
    }

    /// Loads `~/.deep-research/config.yaml` (or its `$DEEP_RESEARCH_HOME` equivalent).
    pub fn load_default() -> Result<Self> {
        Self::load(&research_paths::default_config_path()?)
    }

    /// Returns a copy rooted at another store directory.
    pub fn with_store_dir(mut self, store_dir: impl Into<PathBuf>) -> Self {
        self.store_dir = store_dir.into();
        self
    }

    /// Whether a snapshot is due after persisting `version`.
    pub fn should_snapshot(&self, version: u64) -> bool {
        if self.snapshot_every == 0 || version == 0 {
            return false;
        }
        version.is_multiple_of(self.snapshot_every)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
store_dir: /var/lib/research
snapshot_every: 5
max_concurrent_workers: 3
structured_log: true
"#;
        let config: OrchestratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/var/lib/research"));
        assert_eq!(config.snapshot_every, 5);
        assert_eq!(config.max_concurrent_workers, 3);
        assert!(config.structured_log);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "max_concurrent_workers: 2\n";
        let config: OrchestratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.snapshot_every, 20);
        assert_eq!(config.max_concurrent_workers, 2);
        assert!(!config.structured_log);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.snapshot_every, 20);
        assert_eq!(config.max_concurrent_workers, 0);
    }

    #[test]
    fn test_load_invalid_yaml_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "snapshot_every: [not, a, number]\n").unwrap();
        let err = OrchestratorConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_should_snapshot() {
        let config = OrchestratorConfig {
            snapshot_every: 20,
            ..OrchestratorConfig::default()
        };
        assert!(!config.should_snapshot(19));
        assert!(config.should_snapshot(20));
        assert!(config.should_snapshot(40));
        assert!(!config.should_snapshot(41));

        let disabled = OrchestratorConfig {
            snapshot_every: 0,
            ..OrchestratorConfig::default()
        };
        assert!(!disabled.should_snapshot(20));
    }
}
