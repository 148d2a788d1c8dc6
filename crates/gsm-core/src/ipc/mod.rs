//! Local command endpoints for foreground servers.
//!
//! A foreground server owns its console, so other processes reach it through a
//! per-server endpoint: a named pipe `\\.\pipe\gsm_<server>` on Windows, a Unix
//! domain socket `gsm_<server>.sock` in the server's config directory elsewhere.
//!
//! # Architecture
//!
//! - **Listener**: started by the foreground launcher, one handler thread per
//!   client, every received line is forwarded to the console relay
//! - **Client**: [`send_line`] connects, writes one line and disconnects
//!
//! Payloads are plain text. One line is one console command; input is decoded
//! lossily, so a client sending invalid UTF-8 cannot take the listener down.

#[cfg(windows)]
mod named_pipe;
#[cfg(unix)]
mod unix_socket;

#[cfg(windows)]
use named_pipe as imp;
#[cfg(unix)]
use unix_socket as imp;

use crate::cancel::CancellationToken;
use crate::config::NamingConfig;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How long `bind` waits for an endpoint still held by an exiting instance.
const BIND_GRACE: Duration = Duration::from_secs(2);
const BIND_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Endpoint identifier for a server: `gsm_<normalized>`.
///
/// Everything outside `[A-Za-z0-9]` is replaced with `_` so the name is valid
/// as a pipe name and as a file name.
pub fn endpoint_id(server: &str) -> String {
    let normalized: String = server
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}", NamingConfig::ENDPOINT_PREFIX, normalized)
}

/// Where the endpoint of `server` lives.
///
/// `config_dir` is the per-server config directory; it is ignored on Windows,
/// where pipes live in the `\\.\pipe\` namespace.
pub fn endpoint_address(server: &str, config_dir: &Path) -> PathBuf {
    imp::address(&endpoint_id(server), config_dir)
}

/// Split a received payload into console lines, dropping blank ones.
pub(crate) fn split_lines(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .lines()
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Handle to a running endpoint listener. Dropping shuts it down.
pub struct EndpointListener {
    server: String,
    address: PathBuf,
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl EndpointListener {
    /// Bind the endpoint of `server` and start accepting clients.
    ///
    /// Every line received is sent to `sink`. The listener stops when `token`
    /// is cancelled and [`shutdown`](Self::shutdown) wakes it. An endpoint
    /// that is still in use is retried for a short grace period, since a
    /// crashed instance's launcher may not have released it yet.
    pub fn bind(
        server: &str,
        config_dir: &Path,
        sink: Sender<String>,
        token: CancellationToken,
    ) -> Result<Self> {
        let address = endpoint_address(server, config_dir);
        let deadline = Instant::now() + BIND_GRACE;
        let thread = loop {
            match imp::spawn_listener(server, &address, sink.clone(), token.clone()) {
                Ok(thread) => break thread,
                Err(e) if Instant::now() < deadline && !token.is_cancelled() => {
                    debug!("Endpoint for '{}' busy, retrying: {}", server, e);
                    thread::sleep(BIND_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        };
        info!("Command endpoint for '{}' listening at {}", server, address.display());

        Ok(Self {
            server: server.to_string(),
            address,
            token,
            thread: Some(thread),
        })
    }

    pub fn address(&self) -> &Path {
        &self.address
    }

    /// Stop accepting clients and wait for the accept loop to exit.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.token.cancel();
        // The accept call blocks; a throwaway connection lets it see the token
        imp::wake(&self.address);
        if thread.join().is_err() {
            tracing::warn!("Endpoint listener for '{}' panicked", self.server);
        }
        debug!("Command endpoint for '{}' shut down", self.server);
    }
}

impl Drop for EndpointListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Deliver one console line to the endpoint of `server`.
///
/// Fails with `ServerNotRunning` when nothing is listening.
pub fn send_line(server: &str, config_dir: &Path, text: &str) -> Result<()> {
    let address = endpoint_address(server, config_dir);
    let mut payload = text.trim_end_matches(['\r', '\n']).to_string();
    payload.push('\n');
    imp::send(server, &address, payload.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_id_normalizes() {
        assert_eq!(endpoint_id("alpha"), "gsm_alpha");
        assert_eq!(endpoint_id("My Server-1"), "gsm_My_Server_1");
        assert_eq!(endpoint_id("a/b\\c"), "gsm_a_b_c");
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines(b"say hi\r\n\n  list \n"), vec!["say hi", "list"]);
        assert!(split_lines(b"\n\r\n").is_empty());
    }

    #[test]
    fn test_split_lines_lossy() {
        let lines = split_lines(b"say \xff\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("say"));
    }

    #[cfg(unix)]
    #[test]
    fn test_endpoint_address_in_config_dir() {
        let address = endpoint_address("alpha", Path::new("/tmp/cfg"));
        assert_eq!(address, PathBuf::from("/tmp/cfg/gsm_alpha.sock"));
    }

    #[cfg(windows)]
    #[test]
    fn test_endpoint_address_is_pipe() {
        let address = endpoint_address("alpha", Path::new("C:\\cfg"));
        assert_eq!(address, PathBuf::from(r"\\.\pipe\gsm_alpha"));
    }
}
