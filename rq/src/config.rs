//! Configuration for refqueue

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::task::WaitingLayout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `ref-updates/`; must be on one filesystem shared by every node
    #[serde(default = "default_events_directory")]
    pub events_directory: PathBuf,

    /// Layout for waiting tasks
    #[serde(default)]
    pub waiting_layout: WaitingLayout,
}

fn default_events_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("refqueue")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            events_directory: default_events_directory(),
            waiting_layout: WaitingLayout::default(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from_file(config_path)
                .context(format!("Failed to load config from {}", config_path.display()));
        }

        // Try default locations
        let default_paths = [
            Some(PathBuf::from("refqueue.yml")),
            dirs::config_dir().map(|p| p.join("refqueue").join("config.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        Ok(Config::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("refqueue.yml");
        std::fs::write(&path, "events_directory: /srv/replication\nwaiting_layout: sharded\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.events_directory, PathBuf::from("/srv/replication"));
        assert_eq!(config.waiting_layout, WaitingLayout::Sharded);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_yaml::from_str("events_directory: /tmp/q\n").unwrap();
        assert_eq!(config.waiting_layout, WaitingLayout::Flat);
    }

    #[test]
    fn test_save_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.yml");
        let config = Config {
            events_directory: temp.path().join("events"),
            waiting_layout: WaitingLayout::Sharded,
        };
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.events_directory, config.events_directory);
        assert_eq!(loaded.waiting_layout, config.waiting_layout);
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp.path().join("nope.yml"))).is_err());
    }
}
