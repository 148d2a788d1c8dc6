//! Server process launchers.
//!
//! A launcher turns a [`LaunchRequest`] into a running server and hands back a
//! [`ProcessHandle`] the supervisor polls and kills through. Two strategies
//! exist:
//!
//! - **Detached** ([`DetachedLauncher`], Unix): the server runs inside a GNU
//!   screen session and outlives the supervisor. `launch` returns once the
//!   session is confirmed.
//! - **Foreground** ([`ForegroundLauncher`]): the server is an owned child
//!   whose stdin is fed by a relay thread and a local command endpoint.
//!   `launch` blocks until the child exits or the request is cancelled.

#[cfg(unix)]
mod detached;
mod foreground;
mod relay;
#[cfg(unix)]
pub mod screen;

#[cfg(unix)]
pub use detached::{DetachedLauncher, ScreenHandle};
pub use foreground::{ForegroundHandle, ForegroundLauncher};
pub use relay::StdinRelay;

use crate::cancel::CancellationToken;
use crate::config::{LaunchMode, NamingConfig};
use crate::error::Result;
use crate::identity::ProcessIdentitySignature;
use crate::pidfile::PidFileStore;
use crate::platform;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A running (or recently running) server process.
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// OS process ID of the server, if known.
    fn pid(&self) -> Option<u32>;

    /// Whether the server is still running.
    fn is_alive(&self) -> bool;

    /// Exit code once the process has exited, when the launcher can observe it.
    fn exit_code(&self) -> Option<i32> {
        None
    }

    /// Forcefully terminate the server.
    fn kill(&self) -> Result<()>;
}

/// Everything a launcher needs to start one server.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub name: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Install directory; the process runs here.
    pub working_dir: PathBuf,
    /// Per-server config directory holding the PID file and command socket.
    pub config_dir: PathBuf,
    /// Wait for a clean exit after `stop` during foreground teardown.
    pub graceful_stop_timeout: Duration,
    pub cancel: CancellationToken,
}

impl LaunchRequest {
    pub fn log_path(&self) -> PathBuf {
        self.working_dir.join(NamingConfig::LOG_FILE_NAME)
    }

    pub fn pid_file(&self) -> Result<PathBuf> {
        PidFileStore::path(&self.config_dir, &PidFileStore::filename_for(&self.name))
    }

    /// Identity a live instance of this server must have.
    pub fn signature(&self) -> ProcessIdentitySignature {
        ProcessIdentitySignature::executable(&self.executable)
    }
}

/// Outcome of a successful launch.
#[derive(Debug, Clone)]
pub struct LaunchResult {
    pub handle: Arc<dyn ProcessHandle>,
    pub log_path: PathBuf,
    pub pid_file: PathBuf,
}

/// Strategy for starting a server process.
pub trait PlatformLauncher: Send + Sync {
    fn mode(&self) -> LaunchMode;

    /// Start the server.
    ///
    /// `on_spawned` is called once the process is running and the handle is
    /// usable. For blocking launchers this is the only way to obtain the
    /// handle before `launch` returns.
    fn launch(&self, request: &LaunchRequest, on_spawned: &dyn Fn(&LaunchResult)) -> Result<LaunchResult>;

    /// Whether `launch` blocks for the lifetime of the process.
    fn blocks_until_exit(&self) -> bool {
        self.mode() == LaunchMode::Foreground
    }

    /// Pick up an instance of the server that is already running.
    fn attach(&self, _request: &LaunchRequest) -> Result<Option<LaunchResult>> {
        Ok(None)
    }
}

/// Handle to a process known only by PID, such as a server left running by a
/// previous supervisor.
#[derive(Debug)]
pub struct PidHandle {
    pid: u32,
}

impl PidHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

impl ProcessHandle for PidHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        platform::is_process_alive(self.pid)
    }

    fn kill(&self) -> Result<()> {
        platform::force_kill(self.pid)
    }
}
