// ABOUTME: Configuration for frpdeck itself: where data lives and how it was deployed.
// ABOUTME: Loaded from TOML with every field defaulted; a missing file means defaults.

use crate::error::ConfigError;
use crate::paths::DeploymentMode;
use crate::persist::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "FRPDECK_CONFIG";

/// Snapshot file name inside the data directory.
pub const SNAPSHOT_FILE: &str = "configs.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeckConfig {
    /// Directory holding configs.json, frpc-config.json and frp/.
    /// Defaults to the platform data dir + "frpdeck". `~` is expanded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    pub mode: DeploymentMode,

    /// Events a log subscriber may fall behind before losing the oldest
    pub log_capacity: usize,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            mode: DeploymentMode::default(),
            log_capacity: 1024,
        }
    }
}

impl DeckConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load config from `path`, or defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save config to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        write_atomic(path, content.as_bytes()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Config file location: `$FRPDECK_CONFIG`, else `<config dir>/frpdeck/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("frpdeck").join("config.toml"))
            .ok_or(ConfigError::NoDirectory("config"))
    }

    /// Data directory with `~` expanded.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(PathBuf::from(shellexpand::tilde(dir).into_owned())),
            None => dirs::data_dir()
                .map(|dir| dir.join("frpdeck"))
                .ok_or(ConfigError::NoDirectory("data")),
        }
    }

    pub fn snapshot_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(SNAPSHOT_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            data_dir = "/srv/frpdeck"
            mode = "packaged"
            log_capacity = 64
        "#
        )
        .unwrap();

        let config = DeckConfig::load(file.path()).unwrap();
        assert_eq!(config.data_dir, Some("/srv/frpdeck".to_string()));
        assert_eq!(config.mode, DeploymentMode::Packaged);
        assert_eq!(config.log_capacity, 64);
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/srv/frpdeck"));
        assert_eq!(
            config.snapshot_path().unwrap(),
            PathBuf::from("/srv/frpdeck/configs.json")
        );
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = DeckConfig::load(file.path()).unwrap();
        assert_eq!(config, DeckConfig::default());
        assert_eq!(config.log_capacity, 1024);
        assert_eq!(config.mode, DeploymentMode::Installed);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeckConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DeckConfig::default());
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "mode = \"sideways\"").unwrap();
        let err = DeckConfig::load_or_default(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = DeckConfig {
            data_dir: Some("~/frp-data".to_string()),
            mode: DeploymentMode::Development,
            log_capacity: 256,
        };
        config.save(&path).unwrap();

        let loaded = DeckConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mode = \"packaged\"\nlog_capacity = 8\n").unwrap();

        DeckConfig::default().save(&path).unwrap();

        assert_eq!(DeckConfig::load(&path).unwrap(), DeckConfig::default());
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_save_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let path = blocker.join("config.toml");

        let err = DeckConfig::default().save(&path).unwrap_err();
        match err {
            ConfigError::Write { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected write error, got {other:?}"),
        }
    }

    #[test]
    fn test_data_dir_expands_tilde() {
        let config = DeckConfig {
            data_dir: Some("~/frp-data".to_string()),
            ..DeckConfig::default()
        };
        let expanded = config.data_dir().unwrap();
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("frp-data"));
    }
}
