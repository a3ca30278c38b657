// ABOUTME: Durable store of named agent configurations backed by a JSON snapshot.
// ABOUTME: Every mutation rewrites the snapshot atomically and rolls back on failure.

use crate::error::StoreError;
use crate::persist::write_atomic;
use crate::record::{file_name_for, ConfigRecord};
use crate::settings::Configuration;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Change notifications for anything displaying the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Added(ConfigRecord),
    Updated(ConfigRecord),
    Removed(String),
    RunningChanged { id: String, running: bool },
}

/// Partial update: `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub name: Option<String>,
    pub settings: Option<Configuration>,
}

/// In-memory records mirrored to a snapshot file.
pub struct ConfigStore {
    path: PathBuf,
    records: Vec<ConfigRecord>,
    events: broadcast::Sender<StoreEvent>,
}

impl ConfigStore {
    /// Open the store at `path`, starting from whatever the snapshot holds.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = Self::load(&path);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        tracing::debug!(path = %path.display(), count = records.len(), "Opened config store");
        Self {
            path,
            records,
            events,
        }
    }

    /// Read the snapshot at `path`.
    ///
    /// The snapshot is an app-local cache, so a missing, unreadable, or
    /// malformed file yields an empty list instead of an error. Individual
    /// entries that don't parse are skipped.
    ///
    /// The next save only writes what was loaded. Whenever anything is
    /// discarded, the original snapshot is first copied to `<path>.bak`.
    pub fn load(path: &Path) -> Vec<ConfigRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config snapshot, starting empty");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config snapshot");
                return Vec::new();
            }
        };

        let entries = match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(serde_json::Value::Array(entries)) => entries,
            Ok(_) => {
                tracing::warn!(path = %path.display(), "Config snapshot is not an array, ignoring it");
                keep_backup(path, &content);
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Config snapshot is not valid JSON");
                keep_backup(path, &content);
                return Vec::new();
            }
        };

        let total = entries.len();
        let records: Vec<ConfigRecord> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| match serde_json::from_value(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping malformed config entry");
                    None
                }
            })
            .collect();
        if records.len() < total {
            keep_backup(path, &content);
        }
        records
    }

    /// Re-read the snapshot, discarding in-memory state.
    pub fn reload(&mut self) {
        self.records = Self::load(&self.path);
    }

    /// Write every record to the snapshot.
    pub fn save(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.records).map_err(StoreError::Serialize)?;
        write_atomic(&self.path, json.as_bytes()).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[ConfigRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&ConfigRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ConfigRecord> {
        let name = name.trim();
        self.records.iter().find(|r| r.name == name)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Create a record. Names are trimmed and must be unique (case-sensitive).
    pub fn add(&mut self, name: &str, settings: Configuration) -> Result<ConfigRecord, StoreError> {
        let name = normalize_name(name)?;
        if self.find_by_name(&name).is_some() {
            return Err(StoreError::DuplicateName(name));
        }
        settings
            .validate()
            .map_err(|v| StoreError::Invalid(v.to_string()))?;

        let previous = self.records.clone();
        let record = ConfigRecord::new(name, settings);
        self.records.push(record.clone());
        self.commit(previous)?;

        tracing::info!(id = %record.id, name = %record.name, "Added configuration");
        self.notify(StoreEvent::Added(record.clone()));
        Ok(record)
    }

    /// Apply a partial update. A rename re-checks uniqueness and re-derives the file name.
    ///
    /// Only the snapshot changes. An agent file generated under the old name
    /// stays on disk until the caller removes it.
    pub fn update(&mut self, id: &str, update: ConfigUpdate) -> Result<ConfigRecord, StoreError> {
        let index = self.index_of(id)?;

        let name = match update.name.as_deref() {
            Some(name) => {
                let name = normalize_name(name)?;
                if self.records.iter().any(|r| r.id != id && r.name == name) {
                    return Err(StoreError::DuplicateName(name));
                }
                Some(name)
            }
            None => None,
        };
        if let Some(settings) = &update.settings {
            settings
                .validate()
                .map_err(|v| StoreError::Invalid(v.to_string()))?;
        }

        let previous = self.records.clone();
        let record = &mut self.records[index];
        if let Some(name) = name {
            record.file_path = file_name_for(&name);
            record.name = name;
        }
        if let Some(settings) = update.settings {
            record.settings = settings;
        }
        let record = record.clone();
        self.commit(previous)?;

        tracing::info!(id = %record.id, name = %record.name, "Updated configuration");
        self.notify(StoreEvent::Updated(record.clone()));
        Ok(record)
    }

    /// Remove a record. Any process running for it is left alone.
    pub fn delete(&mut self, id: &str) -> Result<ConfigRecord, StoreError> {
        let index = self.index_of(id)?;
        let previous = self.records.clone();
        let record = self.records.remove(index);
        self.commit(previous)?;

        tracing::info!(id = %record.id, name = %record.name, "Deleted configuration");
        self.notify(StoreEvent::Removed(record.id.clone()));
        Ok(record)
    }

    /// Record whether the caller believes the record's process is running.
    pub fn set_running(&mut self, id: &str, running: bool) -> Result<(), StoreError> {
        let index = self.index_of(id)?;
        let previous = self.records.clone();
        self.records[index].is_running = running;
        self.commit(previous)?;

        self.notify(StoreEvent::RunningChanged {
            id: id.to_string(),
            running,
        });
        Ok(())
    }

    /// Reset every running hint, e.g. at start-up when no process can be alive yet.
    /// Returns how many hints were cleared.
    pub fn clear_running_flags(&mut self) -> Result<usize, StoreError> {
        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.is_running)
            .map(|r| r.id.clone())
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let previous = self.records.clone();
        for record in &mut self.records {
            record.is_running = false;
        }
        self.commit(previous)?;

        for id in &stale {
            self.notify(StoreEvent::RunningChanged {
                id: id.clone(),
                running: false,
            });
        }
        Ok(stale.len())
    }

    fn index_of(&self, id: &str) -> Result<usize, StoreError> {
        self.records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    // Persist, restoring `previous` if the write fails so memory never runs ahead of disk.
    fn commit(&mut self, previous: Vec<ConfigRecord>) -> Result<(), StoreError> {
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "Rolling back configuration change");
            self.records = previous;
            return Err(e);
        }
        Ok(())
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn normalize_name(name: &str) -> Result<String, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::EmptyName);
    }
    if name.contains(['/', '\\']) {
        return Err(StoreError::Invalid(format!(
            "name \"{name}\" must not contain path separators"
        )));
    }
    Ok(name.to_string())
}

/// Where [`ConfigStore::load`] keeps a snapshot it could not fully read.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

fn keep_backup(path: &Path, content: &str) {
    if content.trim().is_empty() {
        return;
    }
    let backup = backup_path(path);
    match write_atomic(&backup, content.as_bytes()) {
        Ok(()) => tracing::warn!(backup = %backup.display(), "Saved unreadable config snapshot"),
        Err(e) => {
            tracing::warn!(backup = %backup.display(), error = %e, "Failed to back up config snapshot")
        }
    }
}
