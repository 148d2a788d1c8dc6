//! GSM Core - Supervision of dedicated game server processes.
//!
//! This crate starts, stops and monitors long-running game server processes,
//! relays console commands into them, and restarts them after crashes within a
//! bounded retry policy. It has no HTTP or RPC layer; the `gsm` binary and any
//! embedding application call [`ProcessSupervisor`] directly.
//!
//! Servers are hosted in one of two ways, picked by [`PlatformBackend`]:
//!
//! - **Detached** (Unix): a GNU screen session per server, commands typed in
//!   with `screen -X stuff`
//! - **Foreground** (Windows, optional on Unix): an owned child process with a
//!   named pipe or Unix socket command endpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use gsm_core::{MemorySettings, MemoryStatusStore, ProcessSupervisor, ProcessWatchdog};
//! use std::sync::Arc;
//!
//! fn main() -> gsm_core::Result<()> {
//!     let supervisor = ProcessSupervisor::new(
//!         Arc::new(MemorySettings::new()),
//!         Arc::new(MemoryStatusStore::new()),
//!     );
//!     let _watchdog = ProcessWatchdog::new(supervisor.clone()).spawn()?;
//!
//!     supervisor.start("survival")?;
//!     supervisor.send_command("survival", "say Server is up")?;
//!
//!     if let Some(info) = supervisor.get_process_info("survival") {
//!         println!("PID {} using {:.1} MB", info.pid, info.memory_mb);
//!     }
//!
//!     supervisor.stop("survival")?;
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod ipc;
pub mod launcher;
pub mod pidfile;
pub mod platform;
pub mod settings;
pub mod status;
pub mod supervisor;
pub mod system;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use channel::{CommandChannel, EndpointChannel};
pub use config::{LaunchMode, NamingConfig, SettingKeys, SupervisorConfig, SupervisorDefaults};
pub use error::{IdentityCheck, Result, SupervisorError};
pub use identity::{IdentityVerifier, ProcessIdentitySignature};
pub use launcher::{
    ForegroundLauncher, LaunchRequest, LaunchResult, PidHandle, PlatformLauncher, ProcessHandle,
};
pub use pidfile::PidFileStore;
pub use platform::PlatformBackend;
pub use settings::{JsonSettings, MemorySettings, SettingsProvider};
pub use status::{JsonStatusStore, MemoryStatusStore, ServerStatus, StatusStore};
pub use supervisor::{
    ManagedProcess, ProcessInfo, ProcessSupervisor, ProcessWatchdog, StopOutcome, WatchdogAction,
    WatchdogHandle,
};
pub use system::ProcessProbe;

#[cfg(unix)]
pub use channel::ScreenChannel;
#[cfg(unix)]
pub use launcher::DetachedLauncher;
