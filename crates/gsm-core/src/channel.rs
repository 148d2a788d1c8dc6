//! Command delivery to running servers.
//!
//! How a console line reaches a server depends on how it was launched: a
//! detached server is typed into through its screen session, a foreground
//! server through its local command endpoint.

use crate::error::{Result, SupervisorError};
use crate::ipc;
use std::path::PathBuf;
use tracing::debug;

#[cfg(unix)]
use crate::launcher::screen::Screen;

/// Sends console commands to a server by name.
pub trait CommandChannel: Send + Sync {
    /// Deliver `command` to the console of `server`.
    ///
    /// Fails with `ServerNotRunning` when nothing is there to receive it and
    /// with `SendCommand` for any other delivery failure.
    fn send(&self, server: &str, command: &str) -> Result<()>;
}

/// Types into the `gsm-<server>` screen session.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct ScreenChannel {
    screen: Screen,
}

#[cfg(unix)]
impl ScreenChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(unix)]
impl CommandChannel for ScreenChannel {
    fn send(&self, server: &str, command: &str) -> Result<()> {
        let session = Screen::session_name(server);

        if !self.screen.session_exists(&session)? {
            return Err(SupervisorError::not_running(server));
        }

        match self.screen.stuff(&session, command) {
            Ok(true) => {
                debug!("Sent '{}' to session {}", command, session);
                Ok(())
            }
            Ok(false) => Err(SupervisorError::not_running(server)),
            Err(e @ SupervisorError::CommandNotFound { .. }) => Err(e),
            Err(e) => Err(SupervisorError::send_failed(server, e.to_string())),
        }
    }
}

/// Writes to the foreground command endpoint of a server.
#[derive(Debug, Clone)]
pub struct EndpointChannel {
    /// Root of the per-server config directories.
    config_root: PathBuf,
}

impl EndpointChannel {
    pub fn new(config_root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
        }
    }
}

impl CommandChannel for EndpointChannel {
    fn send(&self, server: &str, command: &str) -> Result<()> {
        ipc::send_line(server, &self.config_root.join(server), command)?;
        debug!("Sent '{}' to endpoint of {}", command, server);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_endpoint_channel_not_running() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("alpha")).unwrap();

        let channel = EndpointChannel::new(dir.path());
        let err = channel.send("alpha", "list").unwrap_err();
        assert!(err.is_not_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_endpoint_channel_delivers() {
        use crate::cancel::CancellationToken;
        use crate::ipc::EndpointListener;
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = TempDir::new().unwrap();
        let server_dir = dir.path().join("alpha");
        std::fs::create_dir_all(&server_dir).unwrap();

        let (tx, rx) = mpsc::channel();
        let mut listener =
            EndpointListener::bind("alpha", &server_dir, tx, CancellationToken::new()).unwrap();

        EndpointChannel::new(dir.path()).send("alpha", "say hello").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "say hello");

        listener.shutdown();
        assert!(!listener.address().exists());
    }
}
