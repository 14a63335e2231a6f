use std::time::{Duration, Instant};

use crate::size::ByteProgress;
use crate::tree::BackupType;

/// A start/stop pair for one stage (planning or backup) of a session.
/// `elapsed()` sums only the interval(s) actually recorded — if the stage is
/// still running, it measures up to "now".
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTiming {
    start: Option<Instant>,
    end: Option<Instant>,
}

impl StageTiming {
    pub fn start(&mut self) {
        self.start = Some(Instant::now());
        self.end = None;
    }

    pub fn stop(&mut self) {
        self.end = Some(Instant::now());
    }

    pub fn elapsed(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => Instant::now().saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }
}

/// The `(module, rootDirNode)` aggregate byte count a completed plan carries,
/// used by `ProgressRecord::eta` to scale elapsed time into a prediction.
pub struct PlanTotals {
    pub total_size: u64,
}

/// Tracks two-stage timings and two byte-progress accumulators (the node
/// currently being transferred, and the session total) across a session,
/// owned exclusively by the session driver.
#[derive(Debug, Clone, Default)]
pub struct ProgressRecord {
    pub node_progress: ByteProgress,
    pub total_progress: ByteProgress,

    pub plan_stage: StageTiming,
    pub backup_stage: StageTiming,
}

impl ProgressRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of the plan and backup stage elapsed durations.
    pub fn total_time_taken(&self) -> Duration {
        self.plan_stage.elapsed() + self.backup_stage.elapsed()
    }

    /// `elapsed * plan.totalSize / backedUp - elapsed`. `None` until at
    /// least one byte has been backed up (completed), since the ratio is
    /// undefined at zero.
    pub fn eta(&self, plan: &PlanTotals) -> Option<Duration> {
        let backed_up = self.total_progress.completed;
        if backed_up == 0 {
            return None;
        }
        let elapsed = self.backup_stage.elapsed();
        let projected_total = elapsed.mul_f64(plan.total_size as f64 / backed_up as f64);
        Some(projected_total.saturating_sub(elapsed))
    }
}

/// Predicted byte count for the `rsync` call about to run against a node,
/// per the session driver's per-`backupType` rule: a fixed 1 KiB
/// sentinel for `SKIP` (just the marker file), the subtree's measured
/// `fullSize` for `RECURSIVE`, and the directory's own `localSize` for
/// `CONTENT`.
pub fn predicted_size(backup_type: BackupType, full_size: Option<u64>, local_size: Option<u64>) -> u64 {
    const SKIP_SENTINEL_BYTES: u64 = 1024;
    match backup_type {
        BackupType::Skip => SKIP_SENTINEL_BYTES,
        BackupType::Recursive => full_size.unwrap_or(0),
        BackupType::Content => local_size.unwrap_or(0),
    }
}
