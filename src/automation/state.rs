//! Persisted automation settings and the workspace key-value store

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Key under which [`AutoTimerState`] is stored
pub const STATE_KEY: &str = "branchlink.autoTimer";

/// Current layout of [`AutoTimerState`]
pub const SCHEMA_VERSION: u32 = 1;

/// Branch seen last, remembered across restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastBranchInfo {
    pub branch_name: String,
    pub repo_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    /// A lookup settled `ticket_id`; with `ticket_id: None` the branch is
    /// known to have no ticket
    #[serde(default)]
    pub ticket_checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoTimerState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub auto_log: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_branch_info: Option<LastBranchInfo>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for AutoTimerState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            auto_start: false,
            auto_log: false,
            last_branch_info: None,
        }
    }
}

impl AutoTimerState {
    /// Load from `store`; missing, unreadable or newer-schema blobs yield defaults
    pub fn load(store: &dyn StateStore) -> Self {
        let value = match store.get(STATE_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return Self::default(),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read automation state, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_value::<Self>(value) {
            Ok(state) if state.schema_version > SCHEMA_VERSION => {
                tracing::warn!(
                    found = state.schema_version,
                    supported = SCHEMA_VERSION,
                    "automation state written by a newer version, using defaults"
                );
                Self::default()
            }
            Ok(mut state) => {
                state.schema_version = SCHEMA_VERSION;
                state
            }
            Err(e) => {
                tracing::warn!(error = %e, "automation state is malformed, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, store: &dyn StateStore) -> Result<(), StateStoreError> {
        let value = serde_json::to_value(self)?;
        store.set(STATE_KEY, value)
    }
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("State store IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State store contents are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable key-value storage scoped to one workspace
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StateStoreError>;

    fn set(&self, key: &str, value: Value) -> Result<(), StateStoreError>;
}

/// JSON object on disk, rewritten atomically on every `set`
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The conventional store location for a workspace
    pub fn for_workspace(workspace: &Path) -> Self {
        Self::new(workspace.join(".branchlink").join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, StateStoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StateStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn io_err(&self, source: std::io::Error) -> StateStoreError {
        StateStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StateStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut all = self.read_all()?;
        all.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&all)?;
        std::fs::write(&tmp, content).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StateStoreError> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StateStoreError> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }
}
