//! PID file storage.
//!
//! A PID file holds exactly one base-10 integer. Its presence is only a hint:
//! the PID may have exited or been reused, so anything read here must be
//! checked with [`IdentityVerifier`](crate::identity::IdentityVerifier) before
//! it is acted on.

use crate::atomic::atomic_write;
use crate::config::NamingConfig;
use crate::error::{Result, SupervisorError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads, writes and removes PID files.
pub struct PidFileStore;

impl PidFileStore {
    /// PID file name for a server: `gsm_<server>.pid`.
    pub fn filename_for(server: &str) -> String {
        format!("{}_{}.pid", NamingConfig::PID_FILE_PREFIX, server)
    }

    /// Build the PID file path inside `config_dir`.
    ///
    /// Fails with `NotFound` if `config_dir` does not exist, and with
    /// `MissingArgument` if `filename` is empty.
    pub fn path(config_dir: &Path, filename: &str) -> Result<PathBuf> {
        if filename.trim().is_empty() {
            return Err(SupervisorError::missing_argument("filename"));
        }
        if !config_dir.is_dir() {
            return Err(SupervisorError::NotFound {
                what: "Configuration directory".to_string(),
                path: config_dir.to_path_buf(),
            });
        }
        Ok(config_dir.join(filename))
    }

    /// Read the PID stored at `path`.
    ///
    /// Returns `None` if the file does not exist. An empty, unreadable or
    /// non-integer file is a `FileOperation` error.
    pub fn read(path: &Path) -> Result<Option<u32>> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SupervisorError::file_operation(
                    "Failed to read PID file",
                    path,
                    Some(e),
                ))
            }
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Err(SupervisorError::file_operation("PID file is empty", path, None));
        }

        trimmed.parse::<u32>().map(Some).map_err(|_| {
            SupervisorError::file_operation(
                format!("PID file contains invalid content '{}'", trimmed),
                path,
                None,
            )
        })
    }

    /// Atomically write `pid` to `path`, replacing any previous content.
    pub fn write(path: &Path, pid: u32) -> Result<()> {
        atomic_write(path, pid.to_string().as_bytes()).map_err(|e| {
            SupervisorError::file_operation("Failed to write PID file", path, Some(e))
        })?;
        debug!("Wrote PID {} to {}", pid, path.display());
        Ok(())
    }

    /// Remove the PID file if present.
    ///
    /// Returns `true` when the file was removed or was already absent, `false`
    /// only if the removal itself failed. Failures are logged, never raised.
    pub fn remove_if_exists(path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed PID file {}", path.display());
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Failed to remove PID file {}: {}", path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = PidFileStore::path(temp_dir.path(), "server.pid").unwrap();

        PidFileStore::write(&path, 4242).unwrap();

        assert_eq!(PidFileStore::read(&path).unwrap(), Some(4242));
    }

    #[test]
    fn test_write_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server.pid");

        PidFileStore::write(&path, 1).unwrap();
        PidFileStore::write(&path, 2).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "2");
    }

    #[test]
    fn test_read_missing_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.pid");
        assert_eq!(PidFileStore::read(&path).unwrap(), None);
    }

    #[test]
    fn test_read_tolerates_whitespace() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server.pid");
        fs::write(&path, "  1234\n").unwrap();
        assert_eq!(PidFileStore::read(&path).unwrap(), Some(1234));
    }

    #[test]
    fn test_read_rejects_empty_and_garbage() {
        let temp_dir = TempDir::new().unwrap();

        let empty = temp_dir.path().join("empty.pid");
        fs::write(&empty, "   \n").unwrap();
        assert!(matches!(
            PidFileStore::read(&empty),
            Err(SupervisorError::FileOperation { .. })
        ));

        let garbage = temp_dir.path().join("garbage.pid");
        fs::write(&garbage, "12ab").unwrap();
        assert!(matches!(
            PidFileStore::read(&garbage),
            Err(SupervisorError::FileOperation { .. })
        ));

        let negative = temp_dir.path().join("negative.pid");
        fs::write(&negative, "-5").unwrap();
        assert!(PidFileStore::read(&negative).is_err());
    }

    #[test]
    fn test_path_validation() {
        let temp_dir = TempDir::new().unwrap();

        assert!(matches!(
            PidFileStore::path(temp_dir.path(), ""),
            Err(SupervisorError::MissingArgument { .. })
        ));
        assert!(matches!(
            PidFileStore::path(&temp_dir.path().join("nope"), "server.pid"),
            Err(SupervisorError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server.pid");
        PidFileStore::write(&path, 99).unwrap();

        assert!(PidFileStore::remove_if_exists(&path));
        assert!(!path.exists());
        assert!(PidFileStore::remove_if_exists(&path));
    }

    #[test]
    fn test_filename_for() {
        assert_eq!(PidFileStore::filename_for("alpha"), "gsm_alpha.pid");
    }
}
