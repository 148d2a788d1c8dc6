//! Settings access.
//!
//! The real settings store belongs to the host application; the supervisor only
//! needs `get(key, default)`. Two providers are included: an in-memory map for
//! embedding and tests, and a JSON file for the command-line front end.

use crate::atomic;
use crate::error::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Read-only view of the host's settings store.
pub trait SettingsProvider: Send + Sync {
    /// Get the value stored under `key`, or `default` if absent.
    fn get(&self, key: &str, default: Value) -> Value;
}

/// In-memory settings.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace a value.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.into(), value);
        }
    }
}

impl SettingsProvider for MemorySettings {
    fn get(&self, key: &str, default: Value) -> Value {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(key).cloned())
            .unwrap_or(default)
    }
}

/// Settings loaded from a JSON document.
///
/// Keys are dotted paths: `supervisor.max_retries` resolves to
/// `{"supervisor": {"max_retries": ...}}`, and a literal top-level key
/// `"supervisor.max_retries"` is honoured as well.
#[derive(Debug)]
pub struct JsonSettings {
    path: PathBuf,
    root: Map<String, Value>,
}

impl JsonSettings {
    /// Load settings from `path`. A missing file yields empty settings.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let root = match atomic::read_json::<Value>(&path)? {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(crate::error::SupervisorError::Config {
                    message: format!("{} must contain a JSON object", path.display()),
                })
            }
            None => {
                debug!("Settings file {} not found, using defaults", path.display());
                Map::new()
            }
        };
        Ok(Self { path, root })
    }

    /// Default settings location: `<config dir>/gsm/settings.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("gsm")
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.root.get(key) {
            return Some(value);
        }
        let mut parts = key.split('.');
        let mut current = self.root.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }
}

impl SettingsProvider for JsonSettings {
    fn get(&self, key: &str, default: Value) -> Value {
        self.lookup(key).cloned().unwrap_or(default)
    }
}
