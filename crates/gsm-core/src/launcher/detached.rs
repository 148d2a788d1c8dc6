//! Detached launcher backed by GNU screen.

use super::screen::Screen;
use super::{LaunchRequest, LaunchResult, PlatformLauncher, ProcessHandle};
use crate::config::{LaunchMode, SupervisorDefaults};
use crate::error::{Result, SupervisorError};
use crate::pidfile::PidFileStore;
use crate::platform;
use crate::system::ProcessProbe;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Handle to a server running inside a screen session.
#[derive(Debug)]
pub struct ScreenHandle {
    session: String,
    session_pid: u32,
    /// Server PID, resolved lazily because the session may not have forked it yet.
    server_pid: Mutex<Option<u32>>,
    screen: Screen,
    probe: Arc<ProcessProbe>,
}

impl ScreenHandle {
    fn new(session: String, session_pid: u32, screen: Screen, probe: Arc<ProcessProbe>) -> Self {
        Self {
            session,
            session_pid,
            server_pid: Mutex::new(None),
            screen,
            probe,
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// The server is the first child of the screen daemon.
    fn resolve_server_pid(&self) -> Option<u32> {
        let mut cached = self.server_pid.lock().ok()?;
        if let Some(pid) = *cached {
            return Some(pid);
        }
        let pid = self.probe.children(self.session_pid).first().copied()?;
        *cached = Some(pid);
        Some(pid)
    }
}

impl ProcessHandle for ScreenHandle {
    fn pid(&self) -> Option<u32> {
        self.resolve_server_pid().or(Some(self.session_pid))
    }

    fn is_alive(&self) -> bool {
        match self.screen.session_exists(&self.session) {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Failed to list screen sessions: {}", e);
                false
            }
        }
    }

    fn kill(&self) -> Result<()> {
        let server_pid = self.resolve_server_pid();
        self.screen.quit(&self.session)?;

        if let Some(pid) = server_pid {
            if platform::is_process_alive(pid) {
                debug!("Server {} survived session quit, killing", pid);
                platform::force_kill(pid)?;
            }
        }
        Ok(())
    }
}

/// Runs each server in its own screen session named `gsm-<server>`.
#[derive(Debug)]
pub struct DetachedLauncher {
    screen: Screen,
    probe: Arc<ProcessProbe>,
}

impl DetachedLauncher {
    pub fn new(probe: Arc<ProcessProbe>) -> Self {
        Self {
            screen: Screen::new(),
            probe,
        }
    }

    /// Wait for the session to show up in `screen -ls`.
    fn wait_for_session(&self, request: &LaunchRequest, session: &str) -> Result<u32> {
        let deadline = Instant::now() + SupervisorDefaults::SESSION_CREATE_TIMEOUT;
        loop {
            if let Some(found) = self.screen.find_session(session)? {
                return Ok(found.pid);
            }
            if Instant::now() >= deadline || request.cancel.sleep(SESSION_POLL_INTERVAL) {
                return Err(SupervisorError::start_failed(
                    &request.name,
                    format!("screen session {} did not appear", session),
                ));
            }
        }
    }

    fn record_pid(&self, handle: &ScreenHandle, pid_file: &std::path::Path) {
        let Some(pid) = handle.pid() else {
            return;
        };
        if let Err(e) = PidFileStore::write(pid_file, pid) {
            warn!("Failed to write PID file: {}", e);
        }
    }
}

impl PlatformLauncher for DetachedLauncher {
    fn mode(&self) -> LaunchMode {
        LaunchMode::Detached
    }

    fn launch(&self, request: &LaunchRequest, on_spawned: &dyn Fn(&LaunchResult)) -> Result<LaunchResult> {
        let session = Screen::session_name(&request.name);
        let pid_file = request.pid_file()?;

        if self.screen.session_exists(&session)? {
            return Err(SupervisorError::start_failed(
                &request.name,
                format!("screen session {} already exists", session),
            ));
        }
        if !request.executable.is_file() {
            return Err(SupervisorError::start_failed(
                &request.name,
                format!("executable not found: {}", request.executable.display()),
            ));
        }

        let log_path = request.log_path();
        fs::File::create(&log_path).map_err(|e| {
            SupervisorError::file_operation("Failed to truncate server log", &log_path, Some(e))
        })?;

        info!("Launching '{}' in screen session {}", request.name, session);
        self.screen
            .create_session(
                &session,
                &request.working_dir,
                &log_path,
                &request.executable,
                &request.args,
            )
            .map_err(|e| match e {
                SupervisorError::CommandNotFound { .. } => e,
                other => SupervisorError::start_failed(&request.name, other.to_string()),
            })?;

        let session_pid = self.wait_for_session(request, &session)?;
        let handle = Arc::new(ScreenHandle::new(
            session,
            session_pid,
            self.screen.clone(),
            Arc::clone(&self.probe),
        ));
        self.record_pid(&handle, &pid_file);

        info!(
            "Server '{}' started in screen (session PID {}, server PID {:?})",
            request.name,
            session_pid,
            handle.pid()
        );

        let result = LaunchResult {
            handle,
            log_path,
            pid_file,
        };
        on_spawned(&result);
        Ok(result)
    }

    fn attach(&self, request: &LaunchRequest) -> Result<Option<LaunchResult>> {
        let session = Screen::session_name(&request.name);
        let Some(found) = self.screen.find_session(&session)? else {
            return Ok(None);
        };

        let pid_file = request.pid_file()?;
        let handle = Arc::new(ScreenHandle::new(
            session,
            found.pid,
            self.screen.clone(),
            Arc::clone(&self.probe),
        ));
        self.record_pid(&handle, &pid_file);
        info!("Attached to running screen session for '{}'", request.name);

        Ok(Some(LaunchResult {
            handle,
            log_path: request.log_path(),
            pid_file,
        }))
    }
}
