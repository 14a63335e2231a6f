use std::path::{Path, PathBuf};

use crate::config::{SessionConfig, SourceModule};
use crate::dedup::{self, PrevBackup, SignatureEntry};
use crate::error::BackupError;
use crate::file_system::FileSystem;
use crate::notifier::Notifier;
use crate::path_util::source_id;
use crate::planner;
use crate::progress::{predicted_size, PlanTotals, ProgressRecord};
use crate::rsync_client::runner::{run_with_retry, CancellationToken, OnError};
use crate::session_log::SessionLog;
use crate::tree::{self, BackupType, DirNodeId, DirectoryTree, NodePaths};

const RSYNC_BINARY: &str = "rsync";

/// Statistics emitted once at the end of a session, summarizing what the
/// `ProgressRecord` accumulated.
#[derive(Debug, Clone)]
pub struct SessionStatistics {
    pub sources_completed: usize,
    pub total_bytes_completed: u64,
    pub total_bytes_skipped: u64,
    pub total_bytes_failed: u64,
    pub total_time: std::time::Duration,
    pub session_dir: PathBuf,
}

/// Top-level pipeline: for each configured source, probe → plan → execute;
/// rename the session directory from its `(incomplete)` form; write the
/// signature file; emit statistics. Owns the `ProgressRecord` and the
/// cancellation token for the whole session.
pub struct SessionDriver<'a> {
    config: SessionConfig,
    sources: Vec<SourceModule>,
    fs: &'a dyn FileSystem,
    notifier: &'a mut dyn Notifier,
    cancel: CancellationToken,
    progress: ProgressRecord,
    session_log: Option<SessionLog<'a>>,
}

impl<'a> SessionDriver<'a> {
    pub fn new(
        config: SessionConfig,
        sources: Vec<SourceModule>,
        fs: &'a dyn FileSystem,
        notifier: &'a mut dyn Notifier,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            sources,
            fs,
            notifier,
            cancel,
            progress: ProgressRecord::new(),
            session_log: None,
        }
    }

    /// Append a line to the session's narrative log, if one is open yet
    /// (it opens only once the backup stage has created the session
    /// directory) — a no-op before then.
    fn log_line(&self, line: &str) -> Result<(), BackupError> {
        match &self.session_log {
            Some(log) => log.log(line),
            None => Ok(()),
        }
    }

    /// Run the whole session against `dest_root`, returning final
    /// statistics on success.
    pub fn run(&mut self, dest_root: &Path) -> Result<SessionStatistics, BackupError> {
        self.progress.plan_stage.start();
        let mut plans: Vec<(SourceModule, DirectoryTree)> = Vec::new();

        for (idx, source) in self.sources.clone().iter().enumerate() {
            self.check_cancelled()?;
            self.notifier
                .plan_node_start(idx, &source.source_url)
                .map_err(BackupError::Notifier)?;

            let tree = self.plan_one_source(source)?;

            self.notifier
                .plan_node_done(idx, &source.source_url, &tree, tree.root())
                .map_err(BackupError::Notifier)?;

            plans.push((source.clone(), tree));
        }
        self.progress.plan_stage.stop();

        self.progress.backup_stage.start();

        self.fs.create_dir_all(dest_root)?;
        let timestamp = current_session_timestamp();
        let incomplete_dir = dest_root.join(format!("~rsync_backup_(incomplete)~{}~", timestamp));
        self.fs.create_dir_all(&incomplete_dir)?;

        self.session_log = Some(SessionLog::open(
            self.fs,
            &incomplete_dir,
            self.config.enable_rsync_log,
            self.config.enable_intensive_rsync_log,
        )?);
        self.log_line(&format!("session started: {} source(s)", self.sources.len()))?;

        let current_source_ids: Vec<String> =
            plans.iter().map(|(s, _)| source_id(&s.source_url)).collect();

        let previous_by_id = if self.config.use_previous_backups {
            dedup::discover_previous_backups(
                self.fs,
                dest_root,
                &current_source_ids,
                self.config.clamped_previous_backups_count(),
            )?
        } else {
            Default::default()
        };

        let total_planned_bytes: u64 = plans
            .iter()
            .map(|(_, tree)| tree.node(tree.root()).full_size.unwrap_or(0))
            .sum();
        let plan_totals = PlanTotals { total_size: total_planned_bytes };

        let mut signature_entries = Vec::new();

        for (source, tree) in &plans {
            self.check_cancelled()?;
            let session_subdir = incomplete_dir.join(&source.dest_subpath);
            self.fs.create_dir_all(&session_subdir)?;

            let id = source_id(&source.source_url);
            let prev_backups: Vec<PrevBackup> =
                previous_by_id.get(&id).cloned().unwrap_or_default();
            let link_dests: Vec<PathBuf> = prev_backups.iter().map(|p| p.backup_dir()).collect();

            if let Some(log) = &mut self.session_log {
                log.set_redact_secret(source.password.clone());
            }
            self.log_line(&format!(
                "backing up {} -> {} ({} link-dest donor(s))",
                source.source_url,
                source.dest_subpath,
                link_dests.len()
            ))?;

            self.execute_node(
                tree,
                tree.root(),
                source.password.as_deref(),
                &session_subdir,
                &link_dests,
                &plan_totals,
            )?;

            signature_entries.push(SignatureEntry {
                source_id_cipher: id,
                dest_subpath: source.dest_subpath.clone(),
            });
        }

        self.log_line(&format!(
            "session complete: {} completed, {} skipped, {} failed bytes",
            self.progress.total_progress.completed,
            self.progress.total_progress.skipped,
            self.progress.total_progress.failed
        ))?;

        let complete_dir = dest_root.join(format!("~rsync_backup~{}~", timestamp));
        self.fs.rename(&incomplete_dir, &complete_dir)?;
        dedup::write_signature_file(self.fs, &complete_dir, &signature_entries)?;

        self.progress.backup_stage.stop();

        Ok(SessionStatistics {
            sources_completed: plans.len(),
            total_bytes_completed: self.progress.total_progress.completed,
            total_bytes_skipped: self.progress.total_progress.skipped,
            total_bytes_failed: self.progress.total_progress.failed,
            total_time: self.progress.total_time_taken(),
            session_dir: complete_dir,
        })
    }

    fn check_cancelled(&self) -> Result<(), BackupError> {
        if self.cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        Ok(())
    }

    fn plan_one_source(&mut self, source: &SourceModule) -> Result<DirectoryTree, BackupError> {
        let scaffold_dir = std::env::temp_dir().join(format!("rsync-probe-{}", source_id(&source.source_url)));
        self.fs.create_dir_all(&scaffold_dir)?;

        let probe_args = vec![
            "--recursive".to_string(),
            "--include=*/".to_string(),
            format!("--include={}", self.config.marker_file_name),
            "--exclude=*".to_string(),
        ];
        let probe_paths = NodePaths {
            source: source.source_url.clone(),
            dest: scaffold_dir.display().to_string(),
        };
        let outcome = run_with_retry(
            RSYNC_BINARY,
            &probe_args,
            &source.source_url,
            &scaffold_dir.display().to_string(),
            self.config.clamped_retry_count(),
            source.password.as_deref(),
            &self.cancel,
            &probe_paths,
            0,
            None,
            |_line| {},
        );
        if let Some(fatal) = outcome.fatal_err {
            return Err(fatal);
        }
        if let Some(err) = outcome.session_err {
            return Err(BackupError::PlanningProbeFailed { path: source.source_url.clone(), source: err });
        }

        let mut built_tree = tree::build_tree(
            self.fs,
            &scaffold_dir,
            &source.source_url,
            &self.config.marker_file_name,
        )?;

        let probe = planner::RsyncSizeProbe::new(
            &self.cancel,
            source.password.as_deref(),
            self.config.clamped_retry_count(),
        );
        planner::plan(&mut built_tree, &self.config, &probe, &self.cancel)?;

        self.fs.remove_dir_all(&scaffold_dir)?;

        Ok(built_tree)
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_node(
        &mut self,
        tree: &DirectoryTree,
        node_id: DirNodeId,
        password: Option<&str>,
        dest_base: &Path,
        link_dests: &[PathBuf],
        plan_totals: &PlanTotals,
    ) -> Result<(), BackupError> {
        self.check_cancelled()?;
        let node = tree.node(node_id);
        let backup_type = node.backup_type.unwrap_or(BackupType::Content);
        let predicted = predicted_size(backup_type, node.full_size, node.local_size);
        let paths = node.paths.clone();
        let dest_path = dest_base.display().to_string();

        let args = build_node_args(backup_type, &self.config, &self.config.marker_file_name, link_dests);

        let elapsed = self.progress.backup_stage.elapsed();
        let eta = self.progress.eta(plan_totals);

        self.notifier
            .backup_folder_start(&dest_path, &paths, backup_type, predicted, elapsed, eta)
            .map_err(BackupError::Notifier)?;

        self.progress.node_progress = Default::default();

        let on_error: &OnError<'_> = &|_err, _paths, _predicted, _repeat_idx, retries_left| crate::rsync_client::runner::ErrorDecision {
            retries_left,
            fatal: None,
        };

        if let Some(log) = &self.session_log {
            log.log_command(&format!(
                "{} {} {} {}",
                RSYNC_BINARY,
                args.join(" "),
                paths.source,
                dest_path
            ))?;
        }

        let session_log_ref = &self.session_log;
        let outcome = run_with_retry(
            RSYNC_BINARY,
            &args,
            &paths.source,
            &dest_path,
            self.config.clamped_retry_count(),
            password,
            &self.cancel,
            &paths,
            predicted,
            Some(on_error),
            |line: &str| {
                if let Some(log) = session_log_ref {
                    let _ = log.log_rsync_line(line);
                }
            },
        );

        if let Some(fatal) = outcome.fatal_err {
            return Err(fatal);
        }

        let session_err_msg = outcome.session_err.as_ref().map(|e| e.to_string());
        if outcome.session_err.is_some() {
            self.progress.node_progress.add_failed(predicted);
            self.progress.total_progress.add_failed(predicted);
        } else {
            self.progress.node_progress.add_completed(predicted);
            self.progress.total_progress.add_completed(predicted);
        }

        match &session_err_msg {
            Some(err) => self.log_line(&format!("FAILED {} ({}): {}", dest_path, backup_type_label(backup_type), err))?,
            None => self.log_line(&format!("done {} ({})", dest_path, backup_type_label(backup_type)))?,
        }

        let elapsed = self.progress.backup_stage.elapsed();
        let eta = self.progress.eta(plan_totals);
        let bytes_remaining = plan_totals.total_size.saturating_sub(self.progress.total_progress.completed);
        self.notifier
            .backup_folder_done(
                &dest_path,
                &paths,
                backup_type,
                bytes_remaining,
                predicted,
                elapsed,
                eta,
                session_err_msg.as_deref(),
            )
            .map_err(BackupError::Notifier)?;

        if backup_type == BackupType::Content {
            for &child in &node.children.clone() {
                let child_name = tree.node(child).name.clone();
                let child_dest = dest_base.join(&child_name);
                self.fs.create_dir_all(&child_dest)?;
                let child_link_dests: Vec<PathBuf> =
                    link_dests.iter().map(|p| p.join(&child_name)).collect();
                self.execute_node(tree, child, password, &child_dest, &child_link_dests, plan_totals)?;
            }
        }

        Ok(())
    }
}

fn backup_type_label(backup_type: BackupType) -> &'static str {
    match backup_type {
        BackupType::Recursive => "recursive",
        BackupType::Content => "content",
        BackupType::Skip => "skip",
    }
}

fn build_node_args(
    backup_type: BackupType,
    config: &SessionConfig,
    marker_file_name: &str,
    link_dests: &[PathBuf],
) -> Vec<String> {
    let mut args = Vec::new();
    args.push("--times".to_string());
    args.push("--delete".to_string());

    match backup_type {
        BackupType::Skip => {
            args.push("--dirs".to_string());
            args.push(format!("--include={}", marker_file_name));
            args.push("--exclude=*".to_string());
        }
        BackupType::Recursive => {
            args.push("--recursive".to_string());
        }
        BackupType::Content => {
            args.push("--dirs".to_string());
        }
    }

    let flags = &config.transfer_flags;
    if flags.compress {
        args.push("--compress".to_string());
    }
    if flags.owner {
        args.push("--owner".to_string());
    }
    if flags.group {
        args.push("--group".to_string());
    }
    if flags.perms {
        args.push("--perms".to_string());
    }
    if flags.symlinks {
        args.push("--links".to_string());
    }
    if flags.devices {
        args.push("--devices".to_string());
    }
    if flags.specials {
        args.push("--specials".to_string());
    }

    if !matches!(backup_type, BackupType::Skip) {
        for link_dest in link_dests {
            args.push(format!("--link-dest={}", link_dest.display()));
        }
    }

    args
}

fn current_session_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string()
}
