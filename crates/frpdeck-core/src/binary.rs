// ABOUTME: Persisted location of the agent binary, stored apart from the config snapshot.
// ABOUTME: Falls back to the bundled frpc under the data directory when nothing is configured.

use crate::error::StoreError;
use crate::paths::{self, AGENT_DIR};
use crate::persist::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the binary settings resource inside the data directory.
pub const SETTINGS_FILE: &str = "frpc-config.json";

/// File name of the agent binary on this platform.
pub const AGENT_BINARY: &str = if cfg!(windows) { "frpc.exe" } else { "frpc" };

/// Which agent binary to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBinarySettings {
    #[serde(default)]
    pub frpc_path: Option<PathBuf>,
}

impl AgentBinarySettings {
    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join(SETTINGS_FILE)
    }

    /// Read the settings. Missing or unreadable files yield no configured path.
    pub fn load(data_dir: &Path) -> Self {
        let path = Self::path_in(data_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read binary settings");
                return Self::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed binary settings");
            Self::default()
        })
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), StoreError> {
        let path = Self::path_in(data_dir);
        let json = serde_json::to_string_pretty(self).map_err(StoreError::Serialize)?;
        write_atomic(&path, json.as_bytes()).map_err(|source| StoreError::Write { path, source })
    }

    /// Bundled binary location relative to a root.
    pub fn default_relative() -> PathBuf {
        Path::new(AGENT_DIR).join(AGENT_BINARY)
    }

    /// The configured binary, or `<data_dir>/frp/frpc`.
    pub fn effective_binary(&self, data_dir: &Path) -> PathBuf {
        match &self.frpc_path {
            Some(path) => path.clone(),
            None => data_dir.join(Self::default_relative()),
        }
    }

    /// The configured binary, else the first bundled binary found under
    /// `roots`, else [`Self::effective_binary`].
    pub fn locate(&self, data_dir: &Path, roots: &[PathBuf]) -> PathBuf {
        if let Some(path) = &self.frpc_path {
            return path.clone();
        }
        paths::resolve(Self::default_relative(), roots)
            .unwrap_or_else(|| self.effective_binary(data_dir))
    }
}
