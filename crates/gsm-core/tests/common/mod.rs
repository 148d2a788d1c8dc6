//! Shared fixtures for supervisor integration tests.
//!
//! `FakeLauncher` hands out in-memory process handles; `FakeChannel` records
//! commands and, when told to, makes the server exit on `stop`.

#![allow(dead_code)]

use gsm_core::{
    LaunchMode, LaunchRequest, LaunchResult, MemorySettings, MemoryStatusStore, PidFileStore,
    PlatformBackend, PlatformLauncher, ProcessHandle, ProcessProbe, ProcessSupervisor,
    SettingKeys, SupervisorError,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Debug)]
pub struct FakeHandle {
    pid: u32,
    alive: AtomicBool,
    kills: AtomicUsize,
    kill_fails: AtomicBool,
    poll_panics: AtomicBool,
}

impl FakeHandle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            alive: AtomicBool::new(true),
            kills: AtomicUsize::new(0),
            kill_fails: AtomicBool::new(false),
            poll_panics: AtomicBool::new(false),
        }
    }

    /// Make `kill` fail and leave the process running.
    pub fn fail_kills(&self) {
        self.kill_fails.store(true, Ordering::SeqCst);
    }

    /// Make every liveness check panic.
    pub fn panic_on_poll(&self) {
        self.poll_panics.store(true, Ordering::SeqCst);
    }

    /// Simulate the process exiting on its own.
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        if self.poll_panics.load(Ordering::SeqCst) {
            panic!("liveness check failed for PID {}", self.pid);
        }
        self.alive.load(Ordering::SeqCst)
    }

    fn exit_code(&self) -> Option<i32> {
        if self.alive.load(Ordering::SeqCst) {
            None
        } else {
            Some(1)
        }
    }

    fn kill(&self) -> gsm_core::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.kill_fails.load(Ordering::SeqCst) {
            return Err(SupervisorError::Io {
                message: format!("failed to kill process {}", self.pid),
                path: None,
                source: None,
            });
        }
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeLauncher {
    launches: AtomicUsize,
    fail: AtomicBool,
    panic_for: Mutex<Option<String>>,
    current: Mutex<HashMap<String, Arc<FakeHandle>>>,
}

impl FakeLauncher {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make launches of `name` panic.
    pub fn panic_on_launch(&self, name: &str) {
        *self.panic_for.lock().unwrap() = Some(name.to_string());
    }

    /// Handle of the most recent launch of `name`.
    pub fn current(&self, name: &str) -> Arc<FakeHandle> {
        self.current
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .expect("server was never launched")
    }
}

impl PlatformLauncher for FakeLauncher {
    fn mode(&self) -> LaunchMode {
        LaunchMode::Detached
    }

    fn launch(
        &self,
        request: &LaunchRequest,
        on_spawned: &dyn Fn(&LaunchResult),
    ) -> gsm_core::Result<LaunchResult> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SupervisorError::start_failed(&request.name, "launch refused"));
        }
        if self.panic_for.lock().unwrap().as_deref() == Some(request.name.as_str()) {
            panic!("launcher crashed for '{}'", request.name);
        }
        self.launches.fetch_add(1, Ordering::SeqCst);

        // Our own PID, so process introspection has something real to read
        let handle = Arc::new(FakeHandle::new(std::process::id()));
        let pid_file = request.pid_file()?;
        PidFileStore::write(&pid_file, std::process::id())?;
        self.current
            .lock()
            .unwrap()
            .insert(request.name.clone(), Arc::clone(&handle));

        let result = LaunchResult {
            handle,
            log_path: request.log_path(),
            pid_file,
        };
        on_spawned(&result);
        Ok(result)
    }
}

#[derive(Debug)]
pub struct FakeChannel {
    launcher: Arc<FakeLauncher>,
    honor_stop: AtomicBool,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeChannel {
    pub fn new(launcher: Arc<FakeLauncher>) -> Self {
        Self {
            launcher,
            honor_stop: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Make servers ignore `stop`, forcing a kill.
    pub fn ignore_stop(&self) {
        self.honor_stop.store(false, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl gsm_core::CommandChannel for FakeChannel {
    fn send(&self, server: &str, command: &str) -> gsm_core::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((server.to_string(), command.to_string()));
        if command == "stop" && self.honor_stop.load(Ordering::SeqCst) {
            self.launcher.current(server).crash();
        }
        Ok(())
    }
}

/// A supervisor wired to fakes over a temporary install tree.
pub struct Harness {
    pub dir: TempDir,
    pub supervisor: ProcessSupervisor,
    pub launcher: Arc<FakeLauncher>,
    pub channel: Arc<FakeChannel>,
    pub status: Arc<MemoryStatusStore>,
    pub settings: Arc<MemorySettings>,
}

impl Harness {
    pub fn new(servers: &[&str]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        for server in servers {
            std::fs::create_dir_all(dir.path().join("servers").join(server)).unwrap();
        }

        let settings = Arc::new(
            MemorySettings::new()
                .with(
                    SettingKeys::SERVERS_DIR,
                    json!(dir.path().join("servers").to_string_lossy()),
                )
                .with(
                    SettingKeys::CONFIG_DIR,
                    json!(dir.path().join("config").to_string_lossy()),
                )
                .with(SettingKeys::START_TIMEOUT_SECS, json!(2))
                .with(SettingKeys::STOP_TIMEOUT_SECS, json!(0.3))
                .with(SettingKeys::MAX_RETRIES, json!(3)),
        );
        let status = Arc::new(MemoryStatusStore::new());
        let launcher = Arc::new(FakeLauncher::default());
        let channel = Arc::new(FakeChannel::new(Arc::clone(&launcher)));

        let backend = PlatformBackend {
            launcher: launcher.clone(),
            channel: channel.clone(),
        };
        let supervisor = ProcessSupervisor::with_backend(
            settings.clone(),
            status.clone(),
            backend,
            Arc::new(ProcessProbe::new()),
        );

        Self {
            dir,
            supervisor,
            launcher,
            channel,
            status,
            settings,
        }
    }

    pub fn pid_file(&self, server: &str) -> PathBuf {
        self.dir
            .path()
            .join("config")
            .join(server)
            .join(PidFileStore::filename_for(server))
    }
}
