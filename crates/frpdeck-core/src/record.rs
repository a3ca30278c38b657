// ABOUTME: Application-level record wrapping one agent configuration.
// ABOUTME: Carries the stable id, unique name, derived file name, and running hint.

use crate::paths::agent_relative;
use crate::settings::Configuration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A named configuration as persisted in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    /// Assigned at creation, never changes
    pub id: String,
    pub name: String,
    /// Agent file name, relative to the agent directory
    pub file_path: String,
    #[serde(rename = "config")]
    pub settings: Configuration,
    /// Cached hint; the supervisor is authoritative
    #[serde(default)]
    pub is_running: bool,
}

impl ConfigRecord {
    pub(crate) fn new(name: String, settings: Configuration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: file_name_for(&name),
            name,
            settings,
            is_running: false,
        }
    }

    /// Location of this record's agent file under `data_dir`.
    pub fn agent_file(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(agent_relative(&self.file_path))
    }
}

/// Agent file name derived from a record name.
pub fn file_name_for(name: &str) -> String {
    format!("{name}.toml")
}
