//! Centralized configuration for the supervisor.
//!
//! Defaults live in constant structs; the live values are resolved from a
//! [`SettingsProvider`] every time an operation needs them, so timeouts edited
//! in the settings store take effect without restarting the supervisor.

use crate::settings::SettingsProvider;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Naming used for every artifact the supervisor creates on disk or in the OS.
pub struct NamingConfig;

impl NamingConfig {
    /// Multiplexer session prefix: `gsm-<server>`.
    pub const SESSION_PREFIX: &'static str = "gsm";
    /// Named pipe / socket prefix: `gsm_<server>`.
    pub const ENDPOINT_PREFIX: &'static str = "gsm";
    pub const PID_FILE_PREFIX: &'static str = "gsm";
    pub const LOG_FILE_NAME: &'static str = "server_output.txt";
    /// Text written to a server console to request a graceful shutdown.
    pub const STOP_COMMAND: &'static str = "stop";
}

/// Default timing and retry values.
pub struct SupervisorDefaults;

impl SupervisorDefaults {
    pub const START_TIMEOUT: Duration = Duration::from_secs(60);
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);
    pub const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(30);
    pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);
    pub const MAX_RETRIES: u32 = 3;

    /// Fixed polling interval for start/stop confirmation loops.
    pub const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);
    /// How long a detached launch waits for the multiplexer to list the session.
    pub const SESSION_CREATE_TIMEOUT: Duration = Duration::from_secs(5);

    #[cfg(windows)]
    pub const EXECUTABLE: &'static str = "bedrock_server.exe";
    #[cfg(not(windows))]
    pub const EXECUTABLE: &'static str = "bedrock_server";
}

/// Settings keys read by the supervisor.
pub struct SettingKeys;

impl SettingKeys {
    pub const START_TIMEOUT_SECS: &'static str = "supervisor.start_timeout_secs";
    pub const STOP_TIMEOUT_SECS: &'static str = "supervisor.stop_timeout_secs";
    pub const GRACEFUL_STOP_TIMEOUT_SECS: &'static str = "supervisor.graceful_stop_timeout_secs";
    pub const WATCHDOG_INTERVAL_SECS: &'static str = "supervisor.watchdog_interval_secs";
    pub const MAX_RETRIES: &'static str = "supervisor.max_retries";
    pub const LAUNCH_MODE: &'static str = "supervisor.launch_mode";
    pub const SERVERS_DIR: &'static str = "paths.servers";
    pub const CONFIG_DIR: &'static str = "paths.config";
    pub const EXECUTABLE: &'static str = "server.executable";
    pub const ARGS: &'static str = "server.args";
}

/// How server processes are hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Inside a detachable multiplexer session (Unix only).
    Detached,
    /// As an owned child with a command endpoint; the launcher blocks for the
    /// lifetime of the child.
    Foreground,
}

impl LaunchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchMode::Detached => "detached",
            LaunchMode::Foreground => "foreground",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "detached" | "screen" => Some(LaunchMode::Detached),
            "foreground" => Some(LaunchMode::Foreground),
            _ => None,
        }
    }

    /// The mode used when the settings do not name one.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            LaunchMode::Foreground
        } else {
            LaunchMode::Detached
        }
    }
}

impl std::fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supervisor settings resolved to concrete types.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub graceful_stop_timeout: Duration,
    pub watchdog_interval: Duration,
    pub max_retries: u32,
    pub launch_mode: LaunchMode,
    pub servers_dir: PathBuf,
    pub config_dir: PathBuf,
    pub executable: String,
    pub args: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("gsm");
        Self {
            start_timeout: SupervisorDefaults::START_TIMEOUT,
            stop_timeout: SupervisorDefaults::STOP_TIMEOUT,
            graceful_stop_timeout: SupervisorDefaults::GRACEFUL_STOP_TIMEOUT,
            watchdog_interval: SupervisorDefaults::WATCHDOG_INTERVAL,
            max_retries: SupervisorDefaults::MAX_RETRIES,
            launch_mode: LaunchMode::platform_default(),
            servers_dir: base.join("servers"),
            config_dir: base.join("config"),
            executable: SupervisorDefaults::EXECUTABLE.to_string(),
            args: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    /// Resolve the configuration from a settings provider.
    ///
    /// Values of the wrong type fall back to the defaults. A detached launch
    /// mode requested on Windows is ignored, since no multiplexer exists there.
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| -> Duration {
            settings
                .get(key, json!(default.as_secs_f64()))
                .as_f64()
                .and_then(|v| Duration::try_from_secs_f64(v).ok())
                .unwrap_or(default)
        };

        let path = |key: &str, default: &PathBuf| -> PathBuf {
            settings
                .get(key, Value::Null)
                .as_str()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| default.clone())
        };

        let max_retries = settings
            .get(SettingKeys::MAX_RETRIES, json!(defaults.max_retries))
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.max_retries);

        let launch_mode = settings
            .get(SettingKeys::LAUNCH_MODE, Value::Null)
            .as_str()
            .and_then(LaunchMode::parse)
            .filter(|mode| !(cfg!(windows) && *mode == LaunchMode::Detached))
            .unwrap_or(defaults.launch_mode);

        let executable = settings
            .get(SettingKeys::EXECUTABLE, Value::Null)
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or(defaults.executable);

        let args = match settings.get(SettingKeys::ARGS, Value::Null) {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
            _ => defaults.args,
        };

        Self {
            start_timeout: secs(SettingKeys::START_TIMEOUT_SECS, defaults.start_timeout),
            stop_timeout: secs(SettingKeys::STOP_TIMEOUT_SECS, defaults.stop_timeout),
            graceful_stop_timeout: secs(
                SettingKeys::GRACEFUL_STOP_TIMEOUT_SECS,
                defaults.graceful_stop_timeout,
            ),
            watchdog_interval: secs(SettingKeys::WATCHDOG_INTERVAL_SECS, defaults.watchdog_interval),
            max_retries,
            launch_mode,
            servers_dir: path(SettingKeys::SERVERS_DIR, &defaults.servers_dir),
            config_dir: path(SettingKeys::CONFIG_DIR, &defaults.config_dir),
            executable,
            args,
        }
    }

    /// Install directory of a server.
    pub fn server_dir(&self, name: &str) -> PathBuf {
        self.servers_dir.join(name)
    }

    /// Per-server configuration directory (PID file, command socket).
    pub fn server_config_dir(&self, name: &str) -> PathBuf {
        self.config_dir.join(name)
    }

    /// Full path of a server's executable.
    pub fn executable_path(&self, name: &str) -> PathBuf {
        self.server_dir(name).join(&self.executable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;

    #[test]
    fn test_defaults_without_settings() {
        let config = SupervisorConfig::from_settings(&MemorySettings::new());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.start_timeout, SupervisorDefaults::START_TIMEOUT);
        assert_eq!(config.launch_mode, LaunchMode::platform_default());
        assert!(config.args.is_empty());
    }

    #[test]
    fn test_values_from_settings() {
        let settings = MemorySettings::new()
            .with(SettingKeys::MAX_RETRIES, json!(5))
            .with(SettingKeys::STOP_TIMEOUT_SECS, json!(0.5))
            .with(SettingKeys::SERVERS_DIR, json!("/srv/games"))
            .with(SettingKeys::EXECUTABLE, json!("server.sh"))
            .with(SettingKeys::ARGS, json!(["--port", "19132"]));

        let config = SupervisorConfig::from_settings(&settings);

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.stop_timeout, Duration::from_millis(500));
        assert_eq!(config.server_dir("alpha"), PathBuf::from("/srv/games/alpha"));
        assert_eq!(
            config.executable_path("alpha"),
            PathBuf::from("/srv/games/alpha/server.sh")
        );
        assert_eq!(config.args, vec!["--port".to_string(), "19132".to_string()]);
    }

    #[test]
    fn test_wrong_types_fall_back() {
        let settings = MemorySettings::new()
            .with(SettingKeys::MAX_RETRIES, json!("many"))
            .with(SettingKeys::START_TIMEOUT_SECS, json!(-4));

        let config = SupervisorConfig::from_settings(&settings);

        assert_eq!(config.max_retries, SupervisorDefaults::MAX_RETRIES);
        assert_eq!(config.start_timeout, SupervisorDefaults::START_TIMEOUT);
    }

    #[test]
    fn test_oversized_timeouts_fall_back() {
        let settings = MemorySettings::new()
            .with(SettingKeys::STOP_TIMEOUT_SECS, json!(1e30))
            .with(SettingKeys::WATCHDOG_INTERVAL_SECS, json!(f64::MAX));

        let config = SupervisorConfig::from_settings(&settings);

        assert_eq!(config.stop_timeout, SupervisorDefaults::STOP_TIMEOUT);
        assert_eq!(config.watchdog_interval, SupervisorDefaults::WATCHDOG_INTERVAL);
    }

    #[test]
    fn test_launch_mode_parse() {
        assert_eq!(LaunchMode::parse("Foreground"), Some(LaunchMode::Foreground));
        assert_eq!(LaunchMode::parse("screen"), Some(LaunchMode::Detached));
        assert_eq!(LaunchMode::parse("tmux"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_foreground_mode_on_unix() {
        let settings = MemorySettings::new().with(SettingKeys::LAUNCH_MODE, json!("foreground"));
        let config = SupervisorConfig::from_settings(&settings);
        assert_eq!(config.launch_mode, LaunchMode::Foreground);
    }
}
