//! Error types for the game server supervisor.
//!
//! Every public operation returns one of these variants so callers can branch
//! on the failure kind (for example "already running" versus a generic launch
//! failure) instead of parsing messages.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Identity checks that can fail during PID verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityCheck {
    /// The process executable did not match the expected path.
    Executable,
    /// One or more expected arguments were missing from the command line.
    Arguments,
    /// The caller-supplied predicate rejected the command line.
    Predicate,
}

impl fmt::Display for IdentityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityCheck::Executable => write!(f, "executable"),
            IdentityCheck::Arguments => write!(f, "arguments"),
            IdentityCheck::Predicate => write!(f, "predicate"),
        }
    }
}

fn join_checks(checks: &[IdentityCheck]) -> String {
    checks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Main error type for the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    // Argument validation
    #[error("Missing required argument: {argument}")]
    MissingArgument { argument: String },

    #[error("Invalid argument {argument}: {message}")]
    InvalidArgument { argument: String, message: String },

    // File system errors
    #[error("{what} not found: {path}")]
    NotFound { what: String, path: PathBuf },

    #[error("File operation failed at {path}: {message}")]
    FileOperation {
        message: String,
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Host capabilities
    #[error("Required command not found: {command}")]
    CommandNotFound { command: String },

    #[error("System capability unavailable: {capability}")]
    SystemCapabilityUnavailable { capability: String },

    // Identity verification
    #[error("Process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("Permission denied inspecting process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("Process {pid} does not match the expected server ({})", join_checks(.failed))]
    IdentityMismatch { pid: u32, failed: Vec<IdentityCheck> },

    // Server lifecycle
    #[error("Failed to start server '{server}': {message}")]
    ServerStart { server: String, message: String },

    #[error("Failed to stop server '{server}': {message}")]
    ServerStop { server: String, message: String },

    #[error("Server '{server}' is not running")]
    ServerNotRunning { server: String },

    #[error("Failed to send command to server '{server}': {message}")]
    SendCommand { server: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        SupervisorError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SupervisorError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SupervisorError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a PID file error with path context.
    pub fn file_operation(
        message: impl Into<String>,
        path: impl Into<PathBuf>,
        source: Option<std::io::Error>,
    ) -> Self {
        SupervisorError::FileOperation {
            message: message.into(),
            path: path.into(),
            source,
        }
    }

    pub fn missing_argument(argument: impl Into<String>) -> Self {
        SupervisorError::MissingArgument {
            argument: argument.into(),
        }
    }

    pub fn start_failed(server: &str, message: impl Into<String>) -> Self {
        SupervisorError::ServerStart {
            server: server.to_string(),
            message: message.into(),
        }
    }

    pub fn stop_failed(server: &str, message: impl Into<String>) -> Self {
        SupervisorError::ServerStop {
            server: server.to_string(),
            message: message.into(),
        }
    }

    pub fn not_running(server: &str) -> Self {
        SupervisorError::ServerNotRunning {
            server: server.to_string(),
        }
    }

    pub fn send_failed(server: &str, message: impl Into<String>) -> Self {
        SupervisorError::SendCommand {
            server: server.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error means the target server has no live process.
    pub fn is_not_running(&self) -> bool {
        matches!(self, SupervisorError::ServerNotRunning { .. })
    }

    /// Process exit code for command-line front ends.
    ///
    /// - 2: bad arguments or configuration
    /// - 3: server not running
    /// - 4: start/stop/send failure
    /// - 5: identity verification failure
    /// - 6: missing host tooling or capability
    /// - 1: anything else
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorError::MissingArgument { .. }
            | SupervisorError::InvalidArgument { .. }
            | SupervisorError::Config { .. } => 2,

            SupervisorError::ServerNotRunning { .. } => 3,

            SupervisorError::ServerStart { .. }
            | SupervisorError::ServerStop { .. }
            | SupervisorError::SendCommand { .. } => 4,

            SupervisorError::ProcessNotFound { .. }
            | SupervisorError::PermissionDenied { .. }
            | SupervisorError::IdentityMismatch { .. } => 5,

            SupervisorError::CommandNotFound { .. }
            | SupervisorError::SystemCapabilityUnavailable { .. } => 6,

            _ => 1,
        }
    }
}
