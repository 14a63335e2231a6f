use std::time::Duration;

use crate::tree::{BackupType, DirNodeId, DirectoryTree, NodePaths};

/// Observer hooks the session driver calls at four points per session. All
/// four are synchronous; any error they return is fatal and aborts the
/// session.
pub trait Notifier {
    fn plan_node_start(&mut self, source_idx: usize, source_url: &str) -> Result<(), String> {
        let _ = (source_idx, source_url);
        Ok(())
    }

    fn plan_node_done(
        &mut self,
        source_idx: usize,
        source_url: &str,
        tree: &DirectoryTree,
        root: DirNodeId,
    ) -> Result<(), String> {
        let _ = (source_idx, source_url, tree, root);
        Ok(())
    }

    fn backup_folder_start(
        &mut self,
        root_dest: &str,
        paths: &NodePaths,
        backup_type: BackupType,
        bytes_remaining: u64,
        elapsed: Duration,
        eta: Option<Duration>,
    ) -> Result<(), String> {
        let _ = (root_dest, paths, backup_type, bytes_remaining, elapsed, eta);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn backup_folder_done(
        &mut self,
        root_dest: &str,
        paths: &NodePaths,
        backup_type: BackupType,
        bytes_remaining: u64,
        size_done: u64,
        elapsed: Duration,
        eta: Option<Duration>,
        session_err: Option<&str>,
    ) -> Result<(), String> {
        let _ = (root_dest, paths, backup_type, bytes_remaining, size_done, elapsed, eta, session_err);
        Ok(())
    }
}

/// Null-object implementor for sessions run without an observer.
pub struct NullNotifier;

impl Notifier for NullNotifier {}
