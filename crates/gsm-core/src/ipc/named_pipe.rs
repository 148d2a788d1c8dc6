//! Windows named pipe endpoint.
//!
//! Pipe instances are created with `CreateNamedPipeW` in message mode and
//! wrapped in a [`File`] as soon as they exist, so reads and closing go
//! through std.

#![allow(unsafe_code)]

use crate::cancel::CancellationToken;
use crate::error::{Result, SupervisorError};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, RawHandle};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};
use windows_sys::Win32::Foundation::{ERROR_PIPE_BUSY, ERROR_PIPE_CONNECTED, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{FILE_FLAG_FIRST_PIPE_INSTANCE, PIPE_ACCESS_DUPLEX};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE,
    PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
};

const BUFFER_SIZE: u32 = 64 * 1024;
const BUSY_RETRIES: u32 = 20;
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(50);

pub(super) fn address(endpoint_id: &str, _config_dir: &Path) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{}", endpoint_id))
}

fn create_instance(path: &Path, first: bool) -> std::io::Result<File> {
    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
    let mut open_mode = PIPE_ACCESS_DUPLEX;
    if first {
        open_mode |= FILE_FLAG_FIRST_PIPE_INSTANCE;
    }

    // SAFETY: `wide` is a NUL-terminated UTF-16 string that outlives the call;
    // a null security-attributes pointer requests the default descriptor.
    let handle = unsafe {
        CreateNamedPipeW(
            wide.as_ptr(),
            open_mode,
            PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
            PIPE_UNLIMITED_INSTANCES,
            BUFFER_SIZE,
            BUFFER_SIZE,
            0,
            std::ptr::null(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `handle` is a valid pipe handle we exclusively own; the File
    // takes over closing it.
    Ok(unsafe { File::from_raw_handle(handle as RawHandle) })
}

/// Block until a client connects to `instance`.
fn wait_for_client(instance: &File) -> std::io::Result<()> {
    // SAFETY: the handle stays valid for the borrow of `instance`; a null
    // OVERLAPPED pointer selects a synchronous wait.
    let ok = unsafe { ConnectNamedPipe(instance.as_raw_handle() as _, std::ptr::null_mut()) };
    if ok != 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    // Client connected between create and connect
    if err.raw_os_error() == Some(ERROR_PIPE_CONNECTED as i32) {
        return Ok(());
    }
    Err(err)
}

pub(super) fn spawn_listener(
    server: &str,
    path: &Path,
    sink: Sender<String>,
    token: CancellationToken,
) -> Result<JoinHandle<()>> {
    let first = create_instance(path, true).map_err(|e| {
        SupervisorError::start_failed(
            server,
            format!("cannot create pipe {}: {}", path.display(), e),
        )
    })?;

    let server_name = server.to_string();
    let pipe_path = path.to_path_buf();
    thread::Builder::new()
        .name(format!("gsm-endpoint-{}", server))
        .spawn(move || accept_loop(&server_name, &pipe_path, first, sink, token))
        .map_err(SupervisorError::from)
}

fn accept_loop(
    server: &str,
    path: &Path,
    first: File,
    sink: Sender<String>,
    token: CancellationToken,
) {
    let mut next = Some(first);
    loop {
        let instance = match next.take() {
            Some(instance) => instance,
            None => match create_instance(path, false) {
                Ok(instance) => instance,
                Err(e) => {
                    error!("Failed to create pipe instance for '{}': {}", server, e);
                    break;
                }
            },
        };

        if let Err(e) = wait_for_client(&instance) {
            if token.is_cancelled() {
                break;
            }
            warn!("Pipe connect failed for '{}': {}", server, e);
            continue;
        }
        if token.is_cancelled() {
            break;
        }

        let sink = sink.clone();
        let client_token = token.clone();
        let spawned = thread::Builder::new()
            .name(format!("gsm-client-{}", server))
            .spawn(move || handle_client(instance, sink, client_token));
        if let Err(e) = spawned {
            warn!("Failed to spawn pipe client handler: {}", e);
        }
    }
    debug!("Pipe accept loop for '{}' exited", server);
}

fn handle_client(mut pipe: File, sink: Sender<String>, token: CancellationToken) {
    let mut buf = vec![0u8; BUFFER_SIZE as usize];
    loop {
        match pipe.read(&mut buf) {
            // Broken pipe surfaces as EOF
            Ok(0) => return,
            Ok(n) => {
                for line in super::split_lines(&buf[..n]) {
                    debug!("Pipe received: {}", line);
                    if sink.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("Pipe client read failed: {}", e);
                return;
            }
        }
        if token.is_cancelled() {
            return;
        }
    }
}

fn open_client(path: &Path) -> std::io::Result<File> {
    let mut attempts = 0;
    loop {
        match OpenOptions::new().write(true).open(path) {
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) && attempts < BUSY_RETRIES => {
                attempts += 1;
                thread::sleep(BUSY_RETRY_DELAY);
            }
            other => return other,
        }
    }
}

pub(super) fn wake(path: &Path) {
    let _ = open_client(path);
}

pub(super) fn send(server: &str, path: &Path, payload: &[u8]) -> Result<()> {
    let mut pipe = match open_client(path) {
        Ok(p) => p,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SupervisorError::not_running(server));
        }
        Err(e) => {
            return Err(SupervisorError::send_failed(
                server,
                format!("cannot open {}: {}", path.display(), e),
            ))
        }
    };

    pipe.write_all(payload)
        .and_then(|_| pipe.flush())
        .map_err(|e| match e.kind() {
            // Listener closed its instance while shutting down
            ErrorKind::BrokenPipe => SupervisorError::not_running(server),
            _ => SupervisorError::send_failed(server, e.to_string()),
        })
}
