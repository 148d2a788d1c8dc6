//! Subcommand handlers.
//!
//! Each handler returns the JSON document printed on stdout; errors bubble
//! up to `main`, which maps them to an exit code.

use gsm_core::{
    CancellationToken, LaunchMode, ProcessProbe, ProcessSupervisor, ProcessWatchdog,
    StopOutcome, SupervisorError,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interval between interrupt checks while the supervisor is hosting servers.
const WAIT_SLICE: Duration = Duration::from_millis(500);

/// Adopt an instance started by an earlier invocation.
///
/// Failures only mean there is nothing to adopt, so they are logged and the
/// command proceeds against an empty registry.
fn attach(supervisor: &ProcessSupervisor, name: &str) {
    match supervisor.attach(name) {
        Ok(true) => debug!(server = name, "Attached to running instance"),
        Ok(false) => debug!(server = name, "No running instance to attach"),
        Err(e) => debug!(server = name, "Attach skipped: {}", e),
    }
}

fn outcome_str(outcome: StopOutcome) -> &'static str {
    match outcome {
        StopOutcome::Graceful => "graceful",
        StopOutcome::Forced => "forced",
        StopOutcome::NotRunning => "not_running",
    }
}

pub(crate) fn start(
    supervisor: &ProcessSupervisor,
    name: &str,
    interrupt: &CancellationToken,
) -> gsm_core::Result<Value> {
    // A foreground child lives only as long as this process
    if supervisor.launch_mode() == LaunchMode::Foreground {
        return run(supervisor, &[name.to_string()], interrupt);
    }

    supervisor.start(name)?;
    Ok(json!({
        "name": name,
        "started": true,
        "pid": supervisor.get_process_info(name).map(|i| i.pid),
    }))
}

pub(crate) fn stop(supervisor: &ProcessSupervisor, name: &str) -> gsm_core::Result<Value> {
    attach(supervisor, name);
    let outcome = supervisor.stop(name)?;
    Ok(json!({
        "name": name,
        "outcome": outcome_str(outcome),
    }))
}

pub(crate) fn send(
    supervisor: &ProcessSupervisor,
    name: &str,
    text: &[String],
) -> gsm_core::Result<Value> {
    let command = text.join(" ");
    attach(supervisor, name);
    supervisor.send_command(name, &command)?;
    Ok(json!({
        "name": name,
        "sent": command,
    }))
}

pub(crate) fn info(supervisor: &ProcessSupervisor, name: &str) -> gsm_core::Result<Value> {
    attach(supervisor, name);

    // The first sample only primes the CPU counters
    if supervisor.get_process_info(name).is_some() {
        std::thread::sleep(ProcessProbe::minimum_cpu_interval());
    }

    let Some(info) = supervisor.get_process_info(name) else {
        return Ok(json!({
            "name": name,
            "running": false,
        }));
    };
    Ok(json!({
        "name": name,
        "running": true,
        "pid": info.pid,
        "cpu_percent": info.cpu_percent,
        "memory_mb": info.memory_mb,
        "uptime_secs": info.uptime.as_secs(),
        "registered_at": info.registered_at,
    }))
}

pub(crate) fn status(supervisor: &ProcessSupervisor, name: &str) -> gsm_core::Result<Value> {
    attach(supervisor, name);
    let status = supervisor.status(name)?;
    Ok(json!({
        "name": name,
        "status": status.map(|s| s.as_str()),
        "running": supervisor.is_running(name),
    }))
}

/// Start `names`, keep them alive with the watchdog until `interrupt` fires,
/// then stop everything.
pub(crate) fn run(
    supervisor: &ProcessSupervisor,
    names: &[String],
    interrupt: &CancellationToken,
) -> gsm_core::Result<Value> {
    let mut started = Vec::with_capacity(names.len());
    let mut failed = Vec::new();
    let mut first_error = None;
    for name in names {
        match supervisor.start(name) {
            Ok(()) => started.push(name.clone()),
            Err(e) => {
                warn!(server = %name, "Failed to start: {}", e);
                failed.push(json!({ "name": name, "error": e.to_string() }));
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if started.is_empty() {
        return match first_error {
            Some(e) => Err(e),
            None => Err(SupervisorError::missing_argument("names")),
        };
    }

    let mut watchdog = ProcessWatchdog::new(supervisor.clone()).spawn()?;
    info!("Supervising {} server(s), press Ctrl-C to stop", started.len());

    while !interrupt.sleep(WAIT_SLICE) {}

    info!("Interrupt received, stopping servers");
    watchdog.stop();
    supervisor.shutdown_all();

    Ok(json!({
        "started": started,
        "failed": failed,
        "stopped": true,
    }))
}
