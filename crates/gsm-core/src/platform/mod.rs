//! Platform abstraction layer.
//!
//! All `#[cfg]` decisions about how servers are hosted live here: the
//! PID-level primitives in [`process`], and [`PlatformBackend`], which pairs
//! a launcher with the command channel that can reach what it launched.
//!
//! # Supported Platforms
//!
//! - **Linux/macOS**: detached (GNU screen) and foreground launch modes
//! - **Windows**: foreground launch mode with named pipe commands

pub mod process;

pub use process::{force_kill, is_process_alive};

use crate::channel::{CommandChannel, EndpointChannel};
use crate::config::{LaunchMode, SupervisorConfig};
use crate::identity::IdentityVerifier;
use crate::launcher::{ForegroundLauncher, PlatformLauncher};
use crate::system::ProcessProbe;
use std::sync::Arc;
use tracing::debug;

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}

/// A launcher together with the channel that delivers commands to its servers.
#[derive(Clone)]
pub struct PlatformBackend {
    pub launcher: Arc<dyn PlatformLauncher>,
    pub channel: Arc<dyn CommandChannel>,
}

impl PlatformBackend {
    /// Pick the backend for the configured launch mode.
    ///
    /// Detached mode needs GNU screen and is unavailable on Windows, where the
    /// foreground backend is always used.
    pub fn select(config: &SupervisorConfig, probe: Arc<ProcessProbe>) -> Self {
        let backend = match config.launch_mode {
            #[cfg(unix)]
            LaunchMode::Detached => Self::detached(probe),
            _ => Self::foreground(config, probe),
        };
        debug!(
            "Selected {} backend on {}",
            backend.launcher.mode(),
            current_platform()
        );
        backend
    }

    #[cfg(unix)]
    pub fn detached(probe: Arc<ProcessProbe>) -> Self {
        use crate::channel::ScreenChannel;
        use crate::launcher::DetachedLauncher;

        Self {
            launcher: Arc::new(DetachedLauncher::new(probe)),
            channel: Arc::new(ScreenChannel::new()),
        }
    }

    pub fn foreground(config: &SupervisorConfig, probe: Arc<ProcessProbe>) -> Self {
        Self {
            launcher: Arc::new(ForegroundLauncher::new(IdentityVerifier::new(probe))),
            channel: Arc::new(EndpointChannel::new(config.config_dir.clone())),
        }
    }

    pub fn mode(&self) -> LaunchMode {
        self.launcher.mode()
    }
}
