//! Foreground launcher: the server is an owned child process.
//!
//! `launch` binds the command endpoint before anything else, so a server
//! whose endpoint is held by another supervisor is rejected without touching
//! its PID file or spawning a duplicate process.
//!
//! `launch` then blocks for the lifetime of the child. Teardown runs in a
//! fixed order whether the child exited on its own or the request was
//! cancelled:
//!
//! 1. cancel the per-launch token
//! 2. shut down the command endpoint
//! 3. if the child is alive, relay `stop` and wait up to the graceful timeout
//! 4. kill the child if it is still alive
//! 5. stop the stdin relay
//! 6. remove the PID file if it still names this child

use super::relay::StdinRelay;
use super::{LaunchRequest, LaunchResult, PlatformLauncher, PidHandle, ProcessHandle};
use crate::config::{LaunchMode, NamingConfig};
use crate::error::{Result, SupervisorError};
use crate::identity::IdentityVerifier;
use crate::ipc::EndpointListener;
use crate::pidfile::PidFileStore;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use std::os::unix::process::CommandExt;
#[cfg(windows)]
use std::os::windows::process::CommandExt;

const MONITOR_INTERVAL: Duration = Duration::from_millis(200);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to an owned child process.
#[derive(Debug)]
pub struct ForegroundHandle {
    pid: u32,
    child: Mutex<Child>,
    exit_code: Mutex<Option<i32>>,
}

impl ForegroundHandle {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
            exit_code: Mutex::new(None),
        }
    }

    fn record_exit(&self, code: Option<i32>) {
        if let Ok(mut slot) = self.exit_code.lock() {
            *slot = code;
        }
    }

    /// Poll until the child exits or `timeout` elapses.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_alive() {
                return true;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        !self.is_alive()
    }
}

impl ProcessHandle for ForegroundHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        let Ok(mut child) = self.child.lock() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.record_exit(status.code());
                false
            }
            Err(e) => {
                warn!("Failed to poll process {}: {}", self.pid, e);
                false
            }
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code.lock().ok().and_then(|code| *code)
    }

    fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().map_err(|_| SupervisorError::Io {
            message: format!("process {} handle poisoned", self.pid),
            path: None,
            source: None,
        })?;

        if let Ok(Some(status)) = child.try_wait() {
            self.record_exit(status.code());
            return Ok(());
        }

        match child.kill() {
            Ok(()) => {}
            // Already exited and reaped
            Err(e) if e.kind() == ErrorKind::InvalidInput => {}
            Err(e) => {
                return Err(SupervisorError::Io {
                    message: format!("failed to kill process {}", self.pid),
                    path: None,
                    source: Some(e),
                })
            }
        }

        let status = child.wait()?;
        self.record_exit(status.code());
        debug!("Killed process {}", self.pid);
        Ok(())
    }
}

/// Remove `pid_file` only while it still names `pid`; another instance may
/// have claimed it since.
fn remove_own_pid_file(pid_file: &Path, pid: u32) {
    if matches!(PidFileStore::read(pid_file), Ok(Some(recorded)) if recorded == pid) {
        PidFileStore::remove_if_exists(pid_file);
    }
}

/// Runs each server as a child process with a command endpoint.
#[derive(Debug)]
pub struct ForegroundLauncher {
    verifier: IdentityVerifier,
}

impl ForegroundLauncher {
    pub fn new(verifier: IdentityVerifier) -> Self {
        Self { verifier }
    }

    /// Reject the launch if the PID file points at a verified live instance;
    /// clear it if it is stale.
    fn ensure_not_running(&self, request: &LaunchRequest, pid_file: &Path) -> Result<()> {
        let pid = match PidFileStore::read(pid_file) {
            Ok(Some(pid)) => pid,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("Ignoring unreadable PID file: {}", e);
                PidFileStore::remove_if_exists(pid_file);
                return Ok(());
            }
        };

        match self.verifier.verify(pid, &request.signature()) {
            Ok(()) => Err(SupervisorError::start_failed(
                &request.name,
                format!("already running with PID {}", pid),
            )),
            Err(e) => {
                debug!("Stale PID file for '{}': {}", request.name, e);
                PidFileStore::remove_if_exists(pid_file);
                Ok(())
            }
        }
    }

    fn spawn_child(&self, request: &LaunchRequest, log_path: &Path) -> Result<Child> {
        if !request.executable.is_file() {
            return Err(SupervisorError::start_failed(
                &request.name,
                format!("executable not found: {}", request.executable.display()),
            ));
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| SupervisorError::file_operation("Failed to open server log", log_path, Some(e)))?;
        let log_err = log.try_clone().map_err(|e| {
            SupervisorError::file_operation("Failed to clone server log handle", log_path, Some(e))
        })?;

        let mut cmd = Command::new(&request.executable);
        cmd.args(&request.args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // Own process group so a console Ctrl-C reaches the supervisor only;
        // the server is stopped through its console instead
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        info!(
            "Launching '{}' from {}",
            request.name,
            request.working_dir.display()
        );
        cmd.spawn().map_err(|e| {
            error!("Failed to spawn '{}': {}", request.name, e);
            SupervisorError::start_failed(&request.name, format!("failed to spawn process: {}", e))
        })
    }

    /// Stop a child that is still running after the monitor loop ended.
    fn stop_child(&self, request: &LaunchRequest, handle: &ForegroundHandle, relay: &StdinRelay) {
        if !handle.is_alive() {
            return;
        }

        info!("Stopping '{}' through its console", request.name);
        if relay.send(NamingConfig::STOP_COMMAND) {
            if handle.wait_timeout(request.graceful_stop_timeout) {
                return;
            }
        } else {
            warn!("Console of '{}' is closed, cannot stop it gracefully", request.name);
        }

        warn!(
            "'{}' did not exit within {:?}, killing",
            request.name, request.graceful_stop_timeout
        );
        if let Err(e) = handle.kill() {
            error!("Failed to kill '{}': {}", request.name, e);
        }
    }
}

impl PlatformLauncher for ForegroundLauncher {
    fn mode(&self) -> LaunchMode {
        LaunchMode::Foreground
    }

    fn launch(&self, request: &LaunchRequest, on_spawned: &dyn Fn(&LaunchResult)) -> Result<LaunchResult> {
        let pid_file = request.pid_file()?;
        let token = request.cancel.child_token();

        // Endpoint lines queue here until the relay owns the child's stdin
        let (console_tx, console_rx) = mpsc::channel::<String>();
        let mut endpoint =
            EndpointListener::bind(&request.name, &request.config_dir, console_tx.clone(), token.clone())?;

        self.ensure_not_running(request, &pid_file)?;

        let log_path = request.log_path();
        let mut child = self.spawn_child(request, &log_path)?;
        let pid = child.id();

        let Some(stdin) = child.stdin.take() else {
            let handle = ForegroundHandle::new(child);
            let _ = handle.kill();
            return Err(SupervisorError::start_failed(&request.name, "child stdin unavailable"));
        };
        let handle = Arc::new(ForegroundHandle::new(child));

        if let Err(e) = PidFileStore::write(&pid_file, pid) {
            let _ = handle.kill();
            return Err(e);
        }

        let mut relay = match StdinRelay::with_channel(&request.name, stdin, console_tx, console_rx) {
            Ok(relay) => relay,
            Err(e) => {
                let _ = handle.kill();
                remove_own_pid_file(&pid_file, pid);
                return Err(e);
            }
        };

        let result = LaunchResult {
            handle: handle.clone(),
            log_path,
            pid_file: pid_file.clone(),
        };
        info!("Server '{}' running in foreground (PID {})", request.name, pid);
        on_spawned(&result);

        loop {
            if !handle.is_alive() {
                info!(
                    "Server '{}' exited with code {:?}",
                    request.name,
                    handle.exit_code()
                );
                break;
            }
            if token.sleep(MONITOR_INTERVAL) {
                info!("Launch of '{}' cancelled", request.name);
                break;
            }
        }

        token.cancel();
        endpoint.shutdown();
        self.stop_child(request, &handle, &relay);
        relay.stop();
        remove_own_pid_file(&pid_file, pid);
        debug!("Foreground teardown for '{}' complete", request.name);

        Ok(result)
    }

    fn attach(&self, request: &LaunchRequest) -> Result<Option<LaunchResult>> {
        let pid_file = request.pid_file()?;
        let Some(pid) = PidFileStore::read(&pid_file).ok().flatten() else {
            return Ok(None);
        };

        if let Err(e) = self.verifier.verify(pid, &request.signature()) {
            debug!("Not attaching to PID {}: {}", pid, e);
            PidFileStore::remove_if_exists(&pid_file);
            return Ok(None);
        }

        // The console belongs to the process that spawned it; only liveness
        // and kill are available after attaching
        info!("Attached to '{}' (PID {})", request.name, pid);
        Ok(Some(LaunchResult {
            handle: Arc::new(PidHandle::new(pid)),
            log_path: request.log_path(),
            pid_file,
        }))
    }
}
