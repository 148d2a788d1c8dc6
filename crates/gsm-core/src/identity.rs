//! Process identity verification.
//!
//! PIDs are recycled by the OS, so a PID file or a process-table hit is only
//! trusted after the process behind it is shown to be the expected server.

use crate::error::{IdentityCheck, Result, SupervisorError};
use crate::system::{ProcessDetails, ProcessProbe};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Predicate over a process command line (argv).
pub type CmdlinePredicate = Arc<dyn Fn(&[String]) -> bool + Send + Sync>;

/// What a PID must look like to be accepted as a given server.
///
/// At least one field must be set. `custom_predicate` is exclusive: when it is
/// present it alone decides, and combining it with the other fields is an
/// `InvalidArgument` error.
#[derive(Clone, Default)]
pub struct ProcessIdentitySignature {
    pub expected_executable_path: Option<PathBuf>,
    pub expected_args: Option<Vec<String>>,
    pub custom_predicate: Option<CmdlinePredicate>,
}

impl fmt::Debug for ProcessIdentitySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessIdentitySignature")
            .field("expected_executable_path", &self.expected_executable_path)
            .field("expected_args", &self.expected_args)
            .field("custom_predicate", &self.custom_predicate.is_some())
            .finish()
    }
}

impl ProcessIdentitySignature {
    pub fn executable(path: impl Into<PathBuf>) -> Self {
        Self {
            expected_executable_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn predicate(predicate: impl Fn(&[String]) -> bool + Send + Sync + 'static) -> Self {
        Self {
            custom_predicate: Some(Arc::new(predicate)),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        let has_fields = self.expected_executable_path.is_some() || self.expected_args.is_some();
        match (&self.custom_predicate, has_fields) {
            (None, false) => Err(SupervisorError::missing_argument(
                "expected_executable_path, expected_args or custom_predicate",
            )),
            (Some(_), true) => Err(SupervisorError::InvalidArgument {
                argument: "custom_predicate".to_string(),
                message: "cannot be combined with executable or argument checks".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Verifies PIDs against a [`ProcessIdentitySignature`].
#[derive(Debug, Clone)]
pub struct IdentityVerifier {
    probe: Arc<ProcessProbe>,
}

impl IdentityVerifier {
    pub fn new(probe: Arc<ProcessProbe>) -> Self {
        Self { probe }
    }

    /// Confirm that `pid` is the process described by `signature`.
    pub fn verify(&self, pid: u32, signature: &ProcessIdentitySignature) -> Result<()> {
        signature.validate()?;

        if !self.probe.is_supported() {
            return Err(SupervisorError::SystemCapabilityUnavailable {
                capability: "process introspection".to_string(),
            });
        }

        let details = self
            .probe
            .details(pid)
            .ok_or(SupervisorError::ProcessNotFound { pid })?;

        if details.exe.is_none() && details.cmd.is_empty() {
            return Err(SupervisorError::PermissionDenied { pid });
        }

        let failed = check_signature(&details, signature);
        if failed.is_empty() {
            debug!("Verified identity of process {}", pid);
            Ok(())
        } else {
            debug!("Process {} failed identity checks: {:?}", pid, failed);
            Err(SupervisorError::IdentityMismatch { pid, failed })
        }
    }
}

/// Run every requested check and return the ones that failed.
fn check_signature(details: &ProcessDetails, signature: &ProcessIdentitySignature) -> Vec<IdentityCheck> {
    if let Some(predicate) = &signature.custom_predicate {
        return if predicate(&details.cmd) {
            Vec::new()
        } else {
            vec![IdentityCheck::Predicate]
        };
    }

    let mut failed = Vec::new();

    if let Some(expected) = &signature.expected_executable_path {
        if !executable_matches(details, expected) {
            failed.push(IdentityCheck::Executable);
        }
    }

    if let Some(expected_args) = &signature.expected_args {
        if !args_match(&details.cmd, expected_args) {
            failed.push(IdentityCheck::Arguments);
        }
    }

    failed
}

fn normalize_path(path: &Path) -> String {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    resolved.to_string_lossy().to_lowercase()
}

fn basename_lower(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_lowercase())
}

/// Compare resolved paths case-insensitively; when the process executable is
/// unreadable, compare basenames with argv[0] instead.
fn executable_matches(details: &ProcessDetails, expected: &Path) -> bool {
    if let Some(exe) = details.exe.as_deref().filter(|p| !p.as_os_str().is_empty()) {
        return normalize_path(exe) == normalize_path(expected);
    }

    let Some(expected_name) = basename_lower(expected) else {
        return false;
    };
    details
        .cmd
        .first()
        .and_then(|argv0| basename_lower(Path::new(argv0)))
        .map(|name| name == expected_name)
        .unwrap_or(false)
}

/// Every expected argument must appear as a whole token of the command line.
fn args_match(cmd: &[String], expected: &[String]) -> bool {
    expected.iter().all(|arg| cmd.iter().any(|token| token == arg))
}
