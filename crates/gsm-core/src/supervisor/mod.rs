//! Process supervisor.
//!
//! Owns the registry of managed servers and composes the launcher, command
//! channel, PID files and status store into `start`, `stop`, `send_command`
//! and `get_process_info`.
//!
//! # Thread Safety
//!
//! The registry sits behind one mutex. Long waits (launch confirmation, stop
//! polling) happen outside the lock; a name with an operation in flight is
//! kept in `pending` so a second `start` or `stop` for the same server fails
//! fast instead of interleaving.

mod watchdog;

pub use watchdog::{ProcessWatchdog, WatchdogAction, WatchdogHandle};

use crate::cancel::CancellationToken;
use crate::config::{LaunchMode, NamingConfig, SupervisorConfig, SupervisorDefaults};
use crate::error::{Result, SupervisorError};
use crate::launcher::{LaunchRequest, LaunchResult, ProcessHandle};
use crate::pidfile::PidFileStore;
use crate::platform::PlatformBackend;
use crate::settings::SettingsProvider;
use crate::status::{ServerStatus, StatusStore};
use crate::system::ProcessProbe;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A server tracked by the supervisor.
#[derive(Debug)]
pub struct ManagedProcess {
    pub name: String,
    pub handle: Arc<dyn ProcessHandle>,
    /// When this supervisor registered the server.
    pub start_time: DateTime<Utc>,
    /// Set by `stop` so the watchdog does not treat the exit as a crash.
    pub intentionally_stopped: bool,
    /// Consecutive crashes since the last manual start.
    pub failure_count: u32,
    pub previous_cpu_sample: Option<f32>,
    pub previous_sample_time: Option<Instant>,
    pub pid_file: PathBuf,
    /// Cancels a blocking launcher thread.
    cancel: CancellationToken,
}

impl ManagedProcess {
    fn new(
        name: &str,
        handle: Arc<dyn ProcessHandle>,
        failure_count: u32,
        pid_file: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.to_string(),
            handle,
            start_time: Utc::now(),
            intentionally_stopped: false,
            failure_count,
            previous_cpu_sample: None,
            previous_sample_time: None,
            pid_file,
            cancel,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    processes: HashMap<String, ManagedProcess>,
    /// Names with a start or stop in flight.
    pending: HashSet<String>,
}

/// Snapshot of a running server's resource usage.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub uptime: Duration,
    /// When the current registry entry was created (start, restart or attach).
    pub registered_at: DateTime<Utc>,
}

/// How a `stop` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The server exited after the stop command.
    Graceful,
    /// The server ignored the stop command and was killed.
    Forced,
    /// Nothing was running under that name.
    NotRunning,
}

/// A server that exited without being stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Crash {
    pub name: String,
    pub failure_count: u32,
    pub exit_code: Option<i32>,
}

struct Inner {
    registry: Mutex<Registry>,
    settings: Arc<dyn SettingsProvider>,
    status: Arc<dyn StatusStore>,
    backend: PlatformBackend,
    probe: Arc<ProcessProbe>,
    shutdown: CancellationToken,
}

/// Removes a name from `pending` when the operation ends.
struct PendingGuard<'a> {
    inner: &'a Inner,
    name: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_registry(&self.inner.registry).pending.remove(&self.name);
    }
}

fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // Registry state stays consistent across a panicking holder
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SupervisorError::missing_argument("name"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(SupervisorError::InvalidArgument {
            argument: "name".to_string(),
            message: format!("'{}' is not a valid server name", name),
        });
    }
    Ok(())
}

/// Liveness as seen by the watchdog. A handle that panics counts as exited.
fn poll_alive(process: &ManagedProcess) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| process.handle.is_alive())).unwrap_or_else(|_| {
        error!(server = %process.name, "Liveness check panicked, treating server as exited");
        false
    })
}

/// Poll `done` every confirmation interval until it holds or `timeout` passes.
fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(SupervisorDefaults::CONFIRM_POLL_INTERVAL));
    }
}

/// Supervises game server processes.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Create a supervisor with the backend matching the configured launch mode.
    pub fn new(settings: Arc<dyn SettingsProvider>, status: Arc<dyn StatusStore>) -> Self {
        let probe = Arc::new(ProcessProbe::new());
        let config = SupervisorConfig::from_settings(settings.as_ref());
        let backend = PlatformBackend::select(&config, Arc::clone(&probe));
        Self::with_backend(settings, status, backend, probe)
    }

    /// Create a supervisor with an explicit launcher/channel pair.
    pub fn with_backend(
        settings: Arc<dyn SettingsProvider>,
        status: Arc<dyn StatusStore>,
        backend: PlatformBackend,
        probe: Arc<ProcessProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                settings,
                status,
                backend,
                probe,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Current configuration, resolved from settings on every call.
    pub fn config(&self) -> SupervisorConfig {
        SupervisorConfig::from_settings(self.inner.settings.as_ref())
    }

    /// How servers are hosted by this supervisor.
    pub fn launch_mode(&self) -> LaunchMode {
        self.inner.backend.mode()
    }

    /// Root token; cancelling it tears down every blocking launcher.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock_registry(&self.inner.registry)
    }

    fn set_status(&self, name: &str, status: ServerStatus) {
        debug!(server = name, status = %status, "Status change");
        if let Err(e) = self.inner.status.set_status(name, status) {
            warn!("Failed to persist status {} for '{}': {}", status, name, e);
        }
    }

    /// Persisted status of a server.
    pub fn status(&self, name: &str) -> Result<Option<ServerStatus>> {
        self.inner.status.get_status(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.registry()
            .processes
            .get(name)
            .map(|p| p.handle.is_alive())
            .unwrap_or(false)
    }

    /// Names of registered servers that are alive, sorted.
    pub fn running_servers(&self) -> Vec<String> {
        let registry = self.registry();
        let mut names: Vec<String> = registry
            .processes
            .values()
            .filter(|p| p.handle.is_alive())
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Crash counter of a registered server.
    pub fn failure_count(&self, name: &str) -> Option<u32> {
        self.registry().processes.get(name).map(|p| p.failure_count)
    }

    /// Reserve `name` for a start-like operation.
    ///
    /// Fails if another operation is in flight or a live instance is
    /// registered; a dead registration is discarded.
    fn begin_start(&self, name: &str) -> Result<PendingGuard<'_>> {
        let mut registry = self.registry();
        if registry.pending.contains(name) {
            return Err(SupervisorError::start_failed(
                name,
                "another operation on this server is in progress",
            ));
        }
        if let Some(existing) = registry.processes.get(name) {
            if existing.handle.is_alive() {
                return Err(SupervisorError::start_failed(name, "already running"));
            }
            registry.processes.remove(name);
        }
        registry.pending.insert(name.to_string());
        Ok(PendingGuard {
            inner: &self.inner,
            name: name.to_string(),
        })
    }

    fn build_request(&self, name: &str, config: &SupervisorConfig) -> Result<LaunchRequest> {
        let working_dir = config.server_dir(name);
        if !working_dir.is_dir() {
            return Err(SupervisorError::NotFound {
                what: "Server directory".to_string(),
                path: working_dir,
            });
        }

        let config_dir = config.server_config_dir(name);
        fs::create_dir_all(&config_dir).map_err(|e| SupervisorError::io_with_path(e, &config_dir))?;

        Ok(LaunchRequest {
            name: name.to_string(),
            executable: config.executable_path(name),
            args: config.args.clone(),
            working_dir,
            config_dir,
            graceful_stop_timeout: config.graceful_stop_timeout,
            cancel: self.inner.shutdown.child_token(),
        })
    }

    /// Run a blocking launcher on its own thread and wait for the handle.
    fn launch_blocking(&self, request: &LaunchRequest, timeout: Duration) -> Result<Arc<dyn ProcessHandle>> {
        let (tx, rx) = mpsc::sync_channel::<Result<Arc<dyn ProcessHandle>>>(1);
        let launcher = Arc::clone(&self.inner.backend.launcher);
        let thread_request = request.clone();

        thread::Builder::new()
            .name(format!("gsm-launch-{}", request.name))
            .spawn(move || {
                let on_spawned = |result: &LaunchResult| {
                    let _ = tx.try_send(Ok(Arc::clone(&result.handle)));
                };
                match launcher.launch(&thread_request, &on_spawned) {
                    Ok(result) => debug!(
                        "Launcher for '{}' returned (exit code {:?})",
                        thread_request.name,
                        result.handle.exit_code()
                    ),
                    Err(e) => {
                        warn!("Launcher for '{}' failed: {}", thread_request.name, e);
                        let _ = tx.try_send(Err(e));
                    }
                }
            })
            .map_err(SupervisorError::from)?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                request.cancel.cancel();
                Err(SupervisorError::start_failed(
                    &request.name,
                    format!("process did not start within {:?}", timeout),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SupervisorError::start_failed(
                &request.name,
                "launcher exited without starting the process",
            )),
        }
    }

    fn launch(&self, request: &LaunchRequest, config: &SupervisorConfig) -> Result<Arc<dyn ProcessHandle>> {
        if self.inner.backend.launcher.blocks_until_exit() {
            return self.launch_blocking(request, config.start_timeout);
        }

        let result = self.inner.backend.launcher.launch(request, &|_| {})?;
        let handle = result.handle;
        if !wait_until(config.start_timeout, || handle.is_alive()) {
            let _ = handle.kill();
            return Err(SupervisorError::start_failed(
                &request.name,
                format!("process not running after {:?}", config.start_timeout),
            ));
        }
        Ok(handle)
    }

    /// Start a server.
    ///
    /// Fails with `ServerStart` if it is already running or another operation
    /// on it is in flight. Status ends as `RUNNING` on success, `ERROR` on
    /// failure.
    pub fn start(&self, name: &str) -> Result<()> {
        self.start_with_failures(name, 0)
    }

    /// Start carrying over the crash counter; the watchdog restarts through this.
    pub(crate) fn start_with_failures(&self, name: &str, failure_count: u32) -> Result<()> {
        validate_name(name)?;
        let _guard = self.begin_start(name)?;
        let config = self.config();

        info!(server = name, failure_count, "Starting server");
        self.set_status(name, ServerStatus::Starting);

        let outcome = self.build_request(name, &config).and_then(|request| {
            let pid_file = request.pid_file()?;
            let handle = self.launch(&request, &config)?;
            Ok((request, pid_file, handle))
        });

        match outcome {
            Ok((request, pid_file, handle)) => {
                let pid = handle.pid();
                self.registry().processes.insert(
                    name.to_string(),
                    ManagedProcess::new(name, handle, failure_count, pid_file, request.cancel),
                );
                self.set_status(name, ServerStatus::Running);
                info!(server = name, pid = ?pid, "Server started");
                Ok(())
            }
            Err(e) => {
                error!(server = name, "Failed to start server: {}", e);
                self.set_status(name, ServerStatus::Error);
                Err(e)
            }
        }
    }

    /// Adopt an instance of `name` that is already running.
    ///
    /// Returns `false` if no running instance was found.
    pub fn attach(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        if self.is_running(name) {
            return Ok(true);
        }
        let _guard = self.begin_start(name)?;
        let config = self.config();
        let request = self.build_request(name, &config)?;

        let Some(result) = self.inner.backend.launcher.attach(&request)? else {
            return Ok(false);
        };
        if !result.handle.is_alive() {
            return Ok(false);
        }

        self.registry().processes.insert(
            name.to_string(),
            ManagedProcess::new(name, result.handle, 0, result.pid_file, request.cancel),
        );
        self.set_status(name, ServerStatus::Running);
        Ok(true)
    }

    /// Stop a server: send `stop`, wait, then kill on timeout.
    ///
    /// A server that is not running is left untouched and reported as
    /// [`StopOutcome::NotRunning`].
    pub fn stop(&self, name: &str) -> Result<StopOutcome> {
        let config = self.config();

        let (handle, cancel, _guard) = {
            let mut registry = self.registry();
            let alive = registry
                .processes
                .get(name)
                .map(|p| p.handle.is_alive())
                .unwrap_or(false);
            if !alive {
                debug!(server = name, "Stop requested but server is not running");
                return Ok(StopOutcome::NotRunning);
            }
            if registry.pending.contains(name) {
                return Err(SupervisorError::stop_failed(
                    name,
                    "another operation on this server is in progress",
                ));
            }

            let Some(entry) = registry.processes.get_mut(name) else {
                return Ok(StopOutcome::NotRunning);
            };
            entry.intentionally_stopped = true;
            let handle = Arc::clone(&entry.handle);
            let cancel = entry.cancel.clone();
            registry.pending.insert(name.to_string());
            (
                handle,
                cancel,
                PendingGuard {
                    inner: &self.inner,
                    name: name.to_string(),
                },
            )
        };

        info!(server = name, "Stopping server");
        self.set_status(name, ServerStatus::Stopping);

        if let Err(e) = self.inner.backend.channel.send(name, NamingConfig::STOP_COMMAND) {
            warn!("Failed to send stop command to '{}': {}", name, e);
        }

        let outcome = if wait_until(config.stop_timeout, || !handle.is_alive()) {
            StopOutcome::Graceful
        } else {
            warn!(
                server = name,
                "Server did not stop within {:?}, killing", config.stop_timeout
            );
            if let Err(e) = handle.kill() {
                error!(server = name, "Failed to kill server: {}", e);
                self.registry().processes.remove(name);
                cancel.cancel();
                self.set_status(name, ServerStatus::Error);
                return Err(SupervisorError::stop_failed(name, e.to_string()));
            }
            StopOutcome::Forced
        };

        let removed = self.registry().processes.remove(name);
        cancel.cancel();
        if let Some(entry) = removed {
            PidFileStore::remove_if_exists(&entry.pid_file);
        }
        self.set_status(name, ServerStatus::Stopped);
        info!(server = name, outcome = ?outcome, "Server stopped");
        Ok(outcome)
    }

    /// Stop every registered server, then cancel all launcher threads.
    pub fn shutdown_all(&self) {
        let names: Vec<String> = self.registry().processes.keys().cloned().collect();
        for name in names {
            match self.stop(&name) {
                Ok(outcome) => debug!(server = %name, outcome = ?outcome, "Shutdown stop"),
                Err(e) => error!(server = %name, "Failed to stop during shutdown: {}", e),
            }
        }
        self.inner.shutdown.cancel();
    }

    /// Write `text` to the console of a running server.
    pub fn send_command(&self, name: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(SupervisorError::missing_argument("command"));
        }
        if !self.is_running(name) {
            return Err(SupervisorError::not_running(name));
        }
        self.inner.backend.channel.send(name, text)
    }

    /// CPU, memory and uptime of a running server.
    ///
    /// `None` if the server is not running or introspection is unavailable.
    /// CPU is resampled at most once per minimum CPU interval; calls in
    /// between return the previous sample.
    pub fn get_process_info(&self, name: &str) -> Option<ProcessInfo> {
        if !self.inner.probe.is_supported() {
            return None;
        }

        let mut registry = self.registry();
        let entry = registry.processes.get_mut(name)?;
        if !entry.handle.is_alive() {
            return None;
        }
        let pid = entry.handle.pid()?;

        let now = Instant::now();
        let fresh = entry
            .previous_sample_time
            .map(|at| now.duration_since(at) < ProcessProbe::minimum_cpu_interval())
            .unwrap_or(false);
        let sample = self.inner.probe.usage(pid, !fresh)?;

        let cpu_percent = match (fresh, entry.previous_cpu_sample) {
            (true, Some(previous)) => previous,
            _ => {
                entry.previous_cpu_sample = Some(sample.cpu_percent);
                entry.previous_sample_time = Some(now);
                sample.cpu_percent
            }
        };

        let memory_mb = (sample.memory_bytes as f64 / (1024.0 * 1024.0) * 10.0).round() / 10.0;
        Some(ProcessInfo {
            pid,
            cpu_percent,
            memory_mb,
            uptime: sample.run_time,
            registered_at: entry.start_time,
        })
    }

    /// Remove exited entries and report the ones that crashed.
    ///
    /// Intentional exits are dropped silently. Entries with an operation in
    /// flight are left for that operation.
    pub(crate) fn reap_exited(&self) -> Vec<Crash> {
        let mut registry = self.registry();
        let exited: Vec<String> = registry
            .processes
            .values()
            .filter(|p| !registry.pending.contains(&p.name) && !poll_alive(p))
            .map(|p| p.name.clone())
            .collect();

        let mut crashes = Vec::new();
        for name in exited {
            let Some(entry) = registry.processes.remove(&name) else {
                continue;
            };
            entry.cancel.cancel();
            PidFileStore::remove_if_exists(&entry.pid_file);

            if entry.intentionally_stopped {
                debug!(server = %name, "Dropping intentionally stopped server");
                continue;
            }
            crashes.push(Crash {
                name,
                failure_count: entry.failure_count + 1,
                exit_code: panic::catch_unwind(AssertUnwindSafe(|| entry.handle.exit_code()))
                    .ok()
                    .flatten(),
            });
        }
        crashes
    }

    pub(crate) fn mark_failed(&self, name: &str) {
        self.set_status(name, ServerStatus::Error);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Release blocking launcher threads if the supervisor goes away
        self.shutdown.cancel();
    }
}
