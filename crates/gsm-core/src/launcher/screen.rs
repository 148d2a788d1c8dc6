//! GNU screen session control.
//!
//! All interaction happens through the `screen` binary: `-dmS` to create,
//! `-ls` to list, `-X stuff` to type into the console and `-X quit` to tear a
//! session down. The exit status of `screen -ls` differs between versions, so
//! only its output is trusted.

use crate::config::NamingConfig;
use crate::error::{Result, SupervisorError};
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// One line of `screen -ls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSession {
    /// PID of the screen daemon that owns the session.
    pub pid: u32,
    pub name: String,
}

/// Thin wrapper around the `screen` command.
#[derive(Debug, Clone)]
pub struct Screen {
    binary: String,
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

impl Screen {
    pub fn new() -> Self {
        Self {
            binary: "screen".to_string(),
        }
    }

    /// Session name for a server: `gsm-<server>`.
    pub fn session_name(server: &str) -> String {
        format!("{}-{}", NamingConfig::SESSION_PREFIX, server)
    }

    fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    SupervisorError::CommandNotFound {
                        command: self.binary.clone(),
                    }
                } else {
                    SupervisorError::Io {
                        message: format!("failed to run {}", self.binary),
                        path: None,
                        source: Some(e),
                    }
                }
            })
    }

    /// List live sessions.
    pub fn list_sessions(&self) -> Result<Vec<ScreenSession>> {
        let output = self.run(["-ls"])?;
        Ok(parse_session_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Find a session by exact name.
    pub fn find_session(&self, session: &str) -> Result<Option<ScreenSession>> {
        Ok(self
            .list_sessions()?
            .into_iter()
            .find(|s| s.name == session))
    }

    pub fn session_exists(&self, session: &str) -> Result<bool> {
        Ok(self.find_session(session)?.is_some())
    }

    /// Create a detached session running `executable`, with the console logged
    /// to `log_path`.
    pub fn create_session(
        &self,
        session: &str,
        working_dir: &Path,
        log_path: &Path,
        executable: &Path,
        args: &[String],
    ) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(["-dmS", session, "-L", "-Logfile"])
            .arg(log_path)
            .arg(executable)
            .args(args)
            .current_dir(working_dir)
            // Bedrock ships its shared libraries next to the binary
            .env("LD_LIBRARY_PATH", working_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    SupervisorError::CommandNotFound {
                        command: self.binary.clone(),
                    }
                } else {
                    SupervisorError::io_with_path(e, working_dir)
                }
            })?;

        if !output.status.success() {
            return Err(SupervisorError::Io {
                message: format!(
                    "screen exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                path: Some(working_dir.to_path_buf()),
                source: None,
            });
        }
        debug!("Created screen session {}", session);
        Ok(())
    }

    /// Type `text` followed by a newline into the session console.
    ///
    /// Returns `Ok(false)` if the session does not exist.
    pub fn stuff(&self, session: &str, text: &str) -> Result<bool> {
        let payload = format!("{}\n", text.trim_end_matches(['\r', '\n']));
        let output = self.run(["-S", session, "-X", "stuff", payload.as_str()])?;
        if session_missing(&output) {
            return Ok(false);
        }
        if !output.status.success() {
            return Err(SupervisorError::Io {
                message: format!(
                    "screen -X stuff failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                path: None,
                source: None,
            });
        }
        Ok(true)
    }

    /// Terminate the session and everything running in it.
    pub fn quit(&self, session: &str) -> Result<()> {
        let output = self.run(["-S", session, "-X", "quit"])?;
        if !output.status.success() && !session_missing(&output) {
            return Err(SupervisorError::Io {
                message: format!(
                    "screen -X quit failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                path: None,
                source: None,
            });
        }
        debug!("Quit screen session {}", session);
        Ok(())
    }
}

fn session_missing(output: &Output) -> bool {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stdout.contains("No screen session found") || stderr.contains("No screen session found")
}

/// Parse the output of `screen -ls`.
///
/// Session lines look like `\t12345.gsm-alpha\t(Detached)`. Dead sessions are
/// skipped; "No Sockets found" yields an empty list.
pub fn parse_session_list(output: &str) -> Vec<ScreenSession> {
    output
        .lines()
        .filter(|line| line.starts_with('\t') || line.starts_with(' '))
        .filter(|line| !line.contains("(Dead"))
        .filter_map(|line| {
            let token = line.split_whitespace().next()?;
            let (pid, name) = token.split_once('.')?;
            Some(ScreenSession {
                pid: pid.parse().ok()?,
                name: name.to_string(),
            })
        })
        .collect()
}
