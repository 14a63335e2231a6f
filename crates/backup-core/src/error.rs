use thiserror::Error;

use crate::file_system::FsError;
use crate::rsync_client::RsyncError;

/// Crate-wide error taxonomy. Every fallible component surfaces one of these
/// variants rather than a bag of strings, so callers (and `onError` recovery
/// callbacks) can match on kind instead of parsing messages.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("rsync error: {0}")]
    Rsync(#[from] RsyncError),

    #[error("file system error: {0}")]
    FileSystem(#[from] FsError),

    #[error("planning probe failed for {path}: {source}")]
    PlanningProbeFailed { path: String, source: RsyncError },

    #[error("signature encode/decode error: {0}")]
    Signature(String),

    #[error("notifier callback failed: {0}")]
    Notifier(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("session cancelled")]
    Cancelled,
}

impl BackupError {
    /// True if the failure is a cancellation that must never be retried.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BackupError::Cancelled)
            || matches!(self, BackupError::Rsync(RsyncError::ProcessTerminated))
    }
}
