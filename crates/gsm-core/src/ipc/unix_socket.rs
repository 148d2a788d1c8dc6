//! Unix domain socket endpoint.

use crate::cancel::CancellationToken;
use crate::error::{Result, SupervisorError};
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

pub(super) fn address(endpoint_id: &str, config_dir: &Path) -> PathBuf {
    config_dir.join(format!("{}.sock", endpoint_id))
}

/// Bind the socket, replacing a stale file left by a dead instance.
fn bind(server: &str, path: &Path) -> Result<UnixListener> {
    if path.exists() {
        if UnixStream::connect(path).is_ok() {
            return Err(SupervisorError::start_failed(
                server,
                format!("command endpoint {} is already in use", path.display()),
            ));
        }
        debug!("Removing stale socket {}", path.display());
        fs::remove_file(path).map_err(|e| SupervisorError::io_with_path(e, path))?;
    }
    UnixListener::bind(path).map_err(|e| SupervisorError::io_with_path(e, path))
}

pub(super) fn spawn_listener(
    server: &str,
    path: &Path,
    sink: Sender<String>,
    token: CancellationToken,
) -> Result<JoinHandle<()>> {
    let listener = bind(server, path)?;
    let server_name = server.to_string();
    let socket_path = path.to_path_buf();

    thread::Builder::new()
        .name(format!("gsm-endpoint-{}", server))
        .spawn(move || {
            accept_loop(&server_name, &listener, sink, token);
            // Unlink while still bound so a successor never loses its socket
            cleanup(&socket_path);
        })
        .map_err(SupervisorError::from)
}

fn accept_loop(server: &str, listener: &UnixListener, sink: Sender<String>, token: CancellationToken) {
    for stream in listener.incoming() {
        if token.is_cancelled() {
            break;
        }
        match stream {
            Ok(stream) => {
                let sink = sink.clone();
                let token = token.clone();
                let spawned = thread::Builder::new()
                    .name(format!("gsm-client-{}", server))
                    .spawn(move || handle_client(stream, sink, token));
                if let Err(e) = spawned {
                    warn!("Failed to spawn endpoint client handler: {}", e);
                }
            }
            Err(e) => {
                error!("Endpoint accept error for '{}': {}", server, e);
            }
        }
    }
    debug!("Endpoint accept loop for '{}' exited", server);
}

fn handle_client(stream: UnixStream, sink: Sender<String>, token: CancellationToken) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {
                for line in super::split_lines(&buf) {
                    debug!("Endpoint received: {}", line);
                    if sink.send(line).is_err() {
                        // Relay is gone, the server is shutting down
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("Endpoint client read failed: {}", e);
                return;
            }
        }
        if token.is_cancelled() {
            return;
        }
    }
}

pub(super) fn wake(path: &Path) {
    let _ = UnixStream::connect(path);
}

fn cleanup(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove socket {}: {}", path.display(), e);
        }
    }
}

/// A listener that closed mid-write is shutting down with its server.
fn write_error(server: &str, err: std::io::Error) -> SupervisorError {
    match err.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => SupervisorError::not_running(server),
        _ => SupervisorError::send_failed(server, err.to_string()),
    }
}

pub(super) fn send(server: &str, path: &Path, payload: &[u8]) -> Result<()> {
    let mut stream = match UnixStream::connect(path) {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Err(SupervisorError::not_running(server));
        }
        Err(e) => {
            return Err(SupervisorError::send_failed(
                server,
                format!("cannot connect to {}: {}", path.display(), e),
            ))
        }
    };

    stream
        .write_all(payload)
        .and_then(|_| stream.flush())
        .map_err(|e| write_error(server, e))?;
    let _ = stream.shutdown(Shutdown::Write);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_listener_reads_as_not_running() {
        let err = write_error("alpha", std::io::Error::from(ErrorKind::BrokenPipe));
        assert!(err.is_not_running());
        let err = write_error("alpha", std::io::Error::from(ErrorKind::ConnectionReset));
        assert!(err.is_not_running());

        let err = write_error("alpha", std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(err, SupervisorError::SendCommand { .. }));
    }

    #[test]
    fn test_send_without_listener() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = send("alpha", &dir.path().join("gsm_alpha.sock"), b"list\n").unwrap_err();
        assert!(err.is_not_running());
    }
}
