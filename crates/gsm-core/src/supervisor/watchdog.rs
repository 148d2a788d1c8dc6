//! Crash detection and restart policy.
//!
//! The watchdog polls the supervisor registry on its own thread. A server that
//! exits without a `stop` is a crash: its `failure_count` goes up by one and it
//! is restarted while `failure_count <= max_retries`. Past that the status is
//! set to `ERROR` and the server stays down until started manually, which
//! resets the count.
//!
//! A panic while handling one server is logged and contained; it never takes
//! the watchdog thread down or skips the other servers in the same poll.

use super::ProcessSupervisor;
use crate::cancel::CancellationToken;
use crate::error::{Result, SupervisorError};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// What the watchdog did about one crashed server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogAction {
    Restarted { name: String, failure_count: u32 },
    RestartFailed { name: String, failure_count: u32 },
    GaveUp { name: String, failure_count: u32 },
}

/// Applies the restart policy to crashed servers.
#[derive(Clone)]
pub struct ProcessWatchdog {
    supervisor: ProcessSupervisor,
}

impl ProcessWatchdog {
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        Self { supervisor }
    }

    /// Run one poll: reap exited servers and restart or fail the crashed ones.
    ///
    /// Never returns an error; failures are logged and reported as actions.
    pub fn tick(&self) -> Vec<WatchdogAction> {
        let crashes = self.supervisor.reap_exited();
        if crashes.is_empty() {
            return Vec::new();
        }

        let max_retries = self.supervisor.config().max_retries;
        let mut actions = Vec::with_capacity(crashes.len());

        for crash in crashes {
            warn!(
                server = %crash.name,
                exit_code = ?crash.exit_code,
                "Server exited unexpectedly (failure {}/{})",
                crash.failure_count,
                max_retries
            );

            if crash.failure_count > max_retries {
                error!(
                    server = %crash.name,
                    "Giving up after {} consecutive failures", crash.failure_count
                );
                self.supervisor.mark_failed(&crash.name);
                actions.push(WatchdogAction::GaveUp {
                    name: crash.name,
                    failure_count: crash.failure_count,
                });
                continue;
            }

            info!(server = %crash.name, "Restarting server");
            let restarted = panic::catch_unwind(AssertUnwindSafe(|| {
                self.supervisor
                    .start_with_failures(&crash.name, crash.failure_count)
            }));
            match restarted {
                Ok(Ok(())) => actions.push(WatchdogAction::Restarted {
                    name: crash.name,
                    failure_count: crash.failure_count,
                }),
                Ok(Err(e)) => {
                    error!(server = %crash.name, "Restart failed: {}", e);
                    actions.push(WatchdogAction::RestartFailed {
                        name: crash.name,
                        failure_count: crash.failure_count,
                    });
                }
                Err(_) => {
                    error!(server = %crash.name, "Restart panicked");
                    self.supervisor.mark_failed(&crash.name);
                    actions.push(WatchdogAction::RestartFailed {
                        name: crash.name,
                        failure_count: crash.failure_count,
                    });
                }
            }
        }
        actions
    }

    /// Run the watchdog on a background thread until the returned handle is
    /// stopped or the supervisor shuts down.
    ///
    /// The poll interval is re-read from settings before every sleep.
    pub fn spawn(self) -> Result<WatchdogHandle> {
        let token = self.supervisor.shutdown_token().child_token();
        let thread_token = token.clone();

        let thread = thread::Builder::new()
            .name("gsm-watchdog".to_string())
            .spawn(move || {
                info!("Watchdog started");
                loop {
                    let interval = self.supervisor.config().watchdog_interval;
                    if thread_token.sleep(interval) {
                        break;
                    }
                    match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
                        Ok(actions) if !actions.is_empty() => {
                            debug!("Watchdog actions: {:?}", actions);
                        }
                        Ok(_) => {}
                        Err(_) => error!("Watchdog poll panicked, continuing"),
                    }
                }
                info!("Watchdog stopped");
            })
            .map_err(SupervisorError::from)?;

        Ok(WatchdogHandle {
            token,
            thread: Some(thread),
        })
    }
}

/// Handle to a running watchdog thread. Dropping stops it.
pub struct WatchdogHandle {
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Stop the watchdog and wait for its thread.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Watchdog thread panicked");
            }
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
