pub mod real;

#[cfg(test)]
pub mod memory;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),
}

/// An injectable file-system boundary. The session driver, dedup discovery,
/// and preflight checks all go through this trait rather than calling
/// `std::fs` directly, so their logic can be exercised against an in-memory
/// fixture instead of real disk.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;
    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError>;

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, FsError>;
    fn read_to_string(&self, path: &Path) -> Result<String, FsError>;
    fn write(&self, path: &Path, content: &str) -> Result<(), FsError>;

    /// Append `content` to `path`, creating the file (and its parent, which
    /// the caller is expected to already have created) if it doesn't exist
    /// yet. Used by the session driver's incremental log files, which must
    /// survive a crash mid-session in the `(incomplete)` directory.
    fn append(&self, path: &Path, content: &str) -> Result<(), FsError>;

    fn modified_time(&self, path: &Path) -> Result<chrono::DateTime<chrono::Utc>, FsError>;

    /// Free space available at (or above) `path`, in bytes.
    fn available_space(&self, path: &Path) -> Result<u64, FsError>;
}
