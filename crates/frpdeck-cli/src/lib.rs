// ABOUTME: Command implementations for the frpdeck CLI.
// ABOUTME: Deck composes the config store, binary settings, and supervisor for each subcommand.

//! # frpdeck-cli
//!
//! Manage named frpc configurations and run them.
//!
//! ```text
//! frpdeck
//! ├── init [--data-dir] [--mode] [--force] # Write the frpdeck config file
//! ├── list                          # Show stored configurations
//! ├── show <name>                   # Show one configuration
//! ├── add <name> --from <file>      # Store settings from a TOML file
//! ├── import <file>                 # Same, named after the file
//! ├── edit <name> [--rename] [--from]
//! ├── remove <name> [--force]
//! ├── render <name>                 # Print the agent TOML
//! ├── binary [--set <path>|--clear] # Show or change the frpc binary
//! └── run [<name>...]               # Start agents and stream their output
//! ```

use anyhow::{bail, Context, Result};
use frpdeck_core::binary::AgentBinarySettings;
use frpdeck_core::config::SNAPSHOT_FILE;
use frpdeck_core::paths::{self, DeploymentMode, Layout};
use frpdeck_core::{
    codec, ConfigRecord, ConfigStore, ConfigUpdate, DeckConfig, LogEvent, LogStream,
    ProcessSupervisor,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Version of the frpdeck CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Write a fresh frpdeck config to `path`. An existing file is kept unless `force`.
pub fn init_config(
    path: &Path,
    data_dir: Option<String>,
    mode: Option<DeploymentMode>,
    force: bool,
) -> Result<DeckConfig> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    let defaults = DeckConfig::default();
    let config = DeckConfig {
        data_dir,
        mode: mode.unwrap_or(defaults.mode),
        ..defaults
    };
    config.save(path)?;
    tracing::info!(path = %path.display(), mode = %config.mode, "Wrote frpdeck config");
    Ok(config)
}

/// The data directory and everything stored in it.
pub struct Deck {
    data_dir: PathBuf,
    roots: Vec<PathBuf>,
    store: ConfigStore,
}

impl Deck {
    /// Open the deck described by `config` for the current process layout.
    pub fn open(config: &DeckConfig) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let roots = paths::candidate_roots(config.mode, &Layout::current());
        Ok(Self::at(data_dir, roots))
    }

    /// Open the deck rooted at `data_dir`, searching `roots` for a bundled binary.
    pub fn at(data_dir: impl Into<PathBuf>, roots: Vec<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let store = ConfigStore::open(data_dir.join(SNAPSHOT_FILE));
        Self {
            data_dir,
            roots,
            store,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn records(&self) -> &[ConfigRecord] {
        self.store.records()
    }

    pub fn record(&self, name: &str) -> Result<&ConfigRecord> {
        self.store
            .find_by_name(name)
            .with_context(|| format!("no configuration named \"{}\"", name.trim()))
    }

    pub fn binary_settings(&self) -> AgentBinarySettings {
        AgentBinarySettings::load(&self.data_dir)
    }

    /// The agent binary that `run` would launch.
    pub fn binary(&self) -> PathBuf {
        self.binary_settings().locate(&self.data_dir, &self.roots)
    }

    pub fn set_binary(&self, path: Option<PathBuf>) -> Result<()> {
        let frpc_path = match path {
            Some(path) => Some(
                std::path::absolute(&path)
                    .with_context(|| format!("invalid binary path {}", path.display()))?,
            ),
            None => None,
        };
        AgentBinarySettings { frpc_path }
            .save(&self.data_dir)
            .context("Failed to save binary settings")
    }

    pub fn add(&mut self, name: &str, from: &Path) -> Result<ConfigRecord> {
        let settings = codec::decode_file(from)?.settings;
        Ok(self.store.add(name, settings)?)
    }

    /// Store a TOML file under the name of its stem.
    pub fn import(&mut self, file: &Path) -> Result<ConfigRecord> {
        let imported = codec::decode_file(file)?;
        Ok(self.store.add(&imported.name, imported.settings)?)
    }

    pub fn edit(
        &mut self,
        name: &str,
        rename: Option<String>,
        from: Option<&Path>,
    ) -> Result<ConfigRecord> {
        let existing = self.record(name)?;
        let id = existing.id.clone();
        let old_file = existing.file_path.clone();
        let settings = match from {
            Some(path) => Some(codec::decode_file(path)?.settings),
            None => None,
        };
        if rename.is_none() && settings.is_none() {
            bail!("nothing to change: pass --rename and/or --from");
        }
        let record = self.store.update(
            &id,
            ConfigUpdate {
                name: rename,
                settings,
            },
        )?;
        if record.file_path != old_file {
            self.discard_agent_file(&old_file);
        }
        Ok(record)
    }

    /// Delete a record. A record marked running needs `force`.
    pub fn remove(&mut self, name: &str, force: bool) -> Result<ConfigRecord> {
        let record = self.record(name)?;
        if record.is_running && !force {
            bail!(
                "\"{}\" is marked as running; stop it first or pass --force",
                record.name
            );
        }
        let id = record.id.clone();
        let record = self.store.delete(&id)?;
        self.discard_agent_file(&record.file_path);
        Ok(record)
    }

    /// Remove a generated agent file that no record points at any more.
    fn discard_agent_file(&self, file_path: &str) {
        let path = self.data_dir.join(paths::agent_relative(file_path));
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed agent file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove agent file")
            }
        }
    }

    pub fn render(&self, name: &str) -> Result<String> {
        Ok(codec::encode(&self.record(name)?.settings)?)
    }

    /// Write agent files and start the named records, or every record when `names` is empty.
    pub async fn start(
        &mut self,
        names: &[String],
        supervisor: &ProcessSupervisor,
    ) -> Result<Vec<ConfigRecord>> {
        let selected: Vec<ConfigRecord> = if names.is_empty() {
            self.store.records().to_vec()
        } else {
            names
                .iter()
                .map(|name| self.record(name).cloned())
                .collect::<Result<_>>()?
        };
        if selected.is_empty() {
            bail!("no configurations to run; add one with `frpdeck add` or `frpdeck import`");
        }

        let binary = self.binary();
        for record in &selected {
            let agent_file = record.agent_file(&self.data_dir);
            codec::write_file(&agent_file, &record.settings)?;
            supervisor
                .start(&record.id, &binary, &agent_file)
                .await
                .with_context(|| format!("Failed to start \"{}\"", record.name))?;
            self.store.set_running(&record.id, true)?;
        }
        Ok(selected)
    }

    /// Align running hints with the processes `supervisor` actually has.
    pub async fn sync_running(&mut self, supervisor: &ProcessSupervisor) -> Result<()> {
        let live: HashSet<String> = supervisor
            .list()
            .await
            .into_iter()
            .map(|p| p.config_id)
            .collect();
        let stale: Vec<(String, bool)> = self
            .store
            .records()
            .iter()
            .filter(|r| r.is_running != live.contains(&r.id))
            .map(|r| (r.id.clone(), live.contains(&r.id)))
            .collect();
        for (id, running) in stale {
            self.store.set_running(&id, running)?;
        }
        Ok(())
    }

    pub fn clear_running(&mut self) -> Result<usize> {
        Ok(self.store.clear_running_flags()?)
    }

    /// A log line labeled with the record name instead of its id.
    pub fn label(&self, event: &LogEvent) -> String {
        let mut labeled = event.clone();
        if let Some(record) = self.store.get(&event.source_id) {
            labeled.source_id = record.name.clone();
        }
        labeled.to_string()
    }
}

/// True for the events after which the set of live processes may have changed.
pub fn changes_liveness(event: &LogEvent) -> bool {
    event.stream == LogStream::System
}

/// One line per record for `list`.
pub fn summary_line(record: &ConfigRecord) -> String {
    let state = if record.is_running { "running" } else { "stopped" };
    format!(
        "{:20} [{}] {}:{} ({} visitors)",
        record.name,
        state,
        record.settings.server_addr,
        record.settings.server_port,
        record.settings.visitors.len()
    )
}
