//! Externally persisted server status.
//!
//! The status field is owned by the host application; the supervisor writes it
//! through [`StatusStore`] as servers move through their lifecycle.

use crate::atomic;
use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::warn;

/// Lifecycle status of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Starting => "STARTING",
            ServerStatus::Running => "RUNNING",
            ServerStatus::Stopping => "STOPPING",
            ServerStatus::Stopped => "STOPPED",
            ServerStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "STARTING" => Some(ServerStatus::Starting),
            "RUNNING" => Some(ServerStatus::Running),
            "STOPPING" => Some(ServerStatus::Stopping),
            "STOPPED" => Some(ServerStatus::Stopped),
            "ERROR" => Some(ServerStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistence for per-server status, keyed by server name.
pub trait StatusStore: Send + Sync {
    fn get_status(&self, name: &str) -> Result<Option<ServerStatus>>;
    fn set_status(&self, name: &str, status: ServerStatus) -> Result<()>;
}

/// In-memory status store.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    statuses: RwLock<HashMap<String, ServerStatus>>,
    history: Mutex<Vec<(String, ServerStatus)>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status written for `name`, oldest first.
    pub fn history(&self, name: &str) -> Vec<ServerStatus> {
        self.history
            .lock()
            .map(|h| {
                h.iter()
                    .filter(|(n, _)| n == name)
                    .map(|(_, s)| *s)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get_status(&self, name: &str) -> Result<Option<ServerStatus>> {
        let statuses = self
            .statuses
            .read()
            .map_err(|_| SupervisorError::Config {
                message: "status store lock poisoned".to_string(),
            })?;
        Ok(statuses.get(name).copied())
    }

    fn set_status(&self, name: &str, status: ServerStatus) -> Result<()> {
        self.statuses
            .write()
            .map_err(|_| SupervisorError::Config {
                message: "status store lock poisoned".to_string(),
            })?
            .insert(name.to_string(), status);
        if let Ok(mut history) = self.history.lock() {
            history.push((name.to_string(), status));
        }
        Ok(())
    }
}

/// Status store backed by a JSON file of `{ "<server>": "<STATUS>" }`.
///
/// Every write rewrites the file atomically. Writes are serialized within this
/// process; concurrent writers in other processes are last-writer-wins.
#[derive(Debug)]
pub struct JsonStatusStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStatusStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Default location: `<config dir>/gsm/status.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("gsm")
            .join("status.json")
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        Ok(atomic::read_json(&self.path)?.unwrap_or_default())
    }
}

impl StatusStore for JsonStatusStore {
    fn get_status(&self, name: &str) -> Result<Option<ServerStatus>> {
        let all = self.load()?;
        Ok(all.get(name).and_then(|raw| {
            let parsed = ServerStatus::parse(raw);
            if parsed.is_none() {
                warn!("Ignoring unknown status '{}' for server '{}'", raw, name);
            }
            parsed
        }))
    }

    fn set_status(&self, name: &str, status: ServerStatus) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| SupervisorError::Config {
            message: "status store lock poisoned".to_string(),
        })?;
        let mut all = self.load()?;
        all.insert(name.to_string(), status.as_str().to_string());
        atomic::write_json(&self.path, &all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            ServerStatus::Starting,
            ServerStatus::Running,
            ServerStatus::Stopping,
            ServerStatus::Stopped,
            ServerStatus::Error,
        ] {
            assert_eq!(ServerStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ServerStatus::parse("running"), Some(ServerStatus::Running));
        assert_eq!(ServerStatus::parse("CRASHED"), None);
    }

    #[test]
    fn test_serde_uses_upper_case() {
        let json = serde_json::to_string(&ServerStatus::Stopped).unwrap();
        assert_eq!(json, "\"STOPPED\"");
    }

    #[test]
    fn test_memory_store_history() {
        let store = MemoryStatusStore::new();
        store.set_status("alpha", ServerStatus::Starting).unwrap();
        store.set_status("beta", ServerStatus::Stopped).unwrap();
        store.set_status("alpha", ServerStatus::Running).unwrap();

        assert_eq!(store.get_status("alpha").unwrap(), Some(ServerStatus::Running));
        assert_eq!(
            store.history("alpha"),
            vec![ServerStatus::Starting, ServerStatus::Running]
        );
        assert_eq!(store.get_status("gamma").unwrap(), None);
    }

    #[test]
    fn test_json_store_persists_between_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("status.json");

        JsonStatusStore::new(&path)
            .set_status("alpha", ServerStatus::Error)
            .unwrap();

        let reopened = JsonStatusStore::new(&path);
        assert_eq!(reopened.get_status("alpha").unwrap(), Some(ServerStatus::Error));
        assert_eq!(reopened.get_status("beta").unwrap(), None);
    }
}
