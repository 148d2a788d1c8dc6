//! Process introspection backed by `sysinfo`.
//!
//! Used for identity verification (executable and command line), for locating
//! the real server process under a multiplexer session, and for CPU, memory
//! and uptime snapshots.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

/// Static facts about a live process.
#[derive(Debug, Clone)]
pub struct ProcessDetails {
    pub pid: u32,
    /// Resolved executable path, if the OS let us read it.
    pub exe: Option<PathBuf>,
    /// Command line tokens (argv), possibly empty when access is denied.
    pub cmd: Vec<String>,
}

/// Point-in-time resource usage of a process.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageSample {
    /// CPU usage since the previous sample of this process (0-100+, can
    /// exceed 100 on multi-core).
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub run_time: Duration,
}

/// Process table access shared by the supervisor and its collaborators.
pub struct ProcessProbe {
    system: Mutex<System>,
}

impl std::fmt::Debug for ProcessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessProbe").finish_non_exhaustive()
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Whether process introspection works on this platform at all.
    pub fn is_supported(&self) -> bool {
        sysinfo::IS_SUPPORTED_SYSTEM
    }

    /// Minimum spacing between two CPU samples for a meaningful delta.
    pub fn minimum_cpu_interval() -> Duration {
        sysinfo::MINIMUM_CPU_UPDATE_INTERVAL
    }

    fn refresh_one(system: &mut System, pid: Pid, kind: ProcessRefreshKind) {
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, kind);
    }

    /// Check whether `pid` is a live (non-zombie) process.
    pub fn is_alive(&self, pid: u32) -> bool {
        let Ok(mut system) = self.system.lock() else {
            return false;
        };
        let sys_pid = Pid::from_u32(pid);
        Self::refresh_one(&mut system, sys_pid, ProcessRefreshKind::new());
        system
            .process(sys_pid)
            .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .unwrap_or(false)
    }

    /// Read executable and command line of `pid`.
    ///
    /// Returns `None` if no such live process exists.
    pub fn details(&self, pid: u32) -> Option<ProcessDetails> {
        let mut system = self.system.lock().ok()?;
        let sys_pid = Pid::from_u32(pid);
        Self::refresh_one(
            &mut system,
            sys_pid,
            ProcessRefreshKind::new()
                .with_exe(UpdateKind::Always)
                .with_cmd(UpdateKind::Always),
        );

        let process = system.process(sys_pid)?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            debug!("Process {} is a zombie, treating as gone", pid);
            return None;
        }

        Some(ProcessDetails {
            pid,
            exe: process.exe().map(|p| p.to_path_buf()),
            cmd: process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
        })
    }

    /// Sample memory and uptime of `pid`, and CPU when `sample_cpu` is set.
    ///
    /// CPU usage is relative to the previous CPU sample of the same process,
    /// so the first sampled call for a PID reports 0. Without `sample_cpu` the
    /// CPU value from the last sample is returned and the delta base is kept.
    pub fn usage(&self, pid: u32, sample_cpu: bool) -> Option<UsageSample> {
        let mut system = self.system.lock().ok()?;
        let sys_pid = Pid::from_u32(pid);
        let kind = if sample_cpu {
            ProcessRefreshKind::new().with_cpu().with_memory()
        } else {
            ProcessRefreshKind::new().with_memory()
        };
        Self::refresh_one(&mut system, sys_pid, kind);

        let process = system.process(sys_pid)?;
        Some(UsageSample {
            cpu_percent: (process.cpu_usage() * 10.0).round() / 10.0,
            memory_bytes: process.memory(),
            run_time: Duration::from_secs(process.run_time()),
        })
    }

    /// Direct children of `pid`, lowest PID first.
    pub fn children(&self, pid: u32) -> Vec<u32> {
        let Ok(mut system) = self.system.lock() else {
            return Vec::new();
        };
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());

        let parent = Pid::from_u32(pid);
        let mut children: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, p)| p.parent() == Some(parent))
            .map(|(child, _)| child.as_u32())
            .collect();
        children.sort_unstable();
        children
    }
}
