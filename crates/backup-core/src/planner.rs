use crate::config::{SessionConfig, AUTO_BLOCK_SIZE_CEIL_MIB, AUTO_BLOCK_SIZE_FLOOR_MIB, AUTO_BLOCK_SIZE_TARGET_CALLS};
use crate::error::BackupError;
use crate::rsync_client::runner::{run_with_retry, CancellationToken};
use crate::rsync_client::RsyncError;
use crate::size::{parse_total_size_line, MIB};
use crate::tree::{BackupType, DirNodeId, DirectoryTree, NodePaths};

const RSYNC_BINARY: &str = "rsync";

/// Abstraction over the two metadata probes the planner needs: a recursive
/// dry-run for a subtree's total size, and a dirs-only dry-run for a single
/// directory's own file bytes. Split out from `RsyncClient` so planner logic
/// can be tested without spawning anything.
pub trait SizeProbe {
    fn full_size(&self, source: &str, dest: &str) -> Result<u64, BackupError>;
    fn local_size(&self, source: &str, dest: &str) -> Result<u64, BackupError>;
}

/// Production `SizeProbe`. Each probe is a dry-run `rsync` call spawned
/// through `run_with_retry`, so it shares the same cancellation and retry
/// behavior as every other invocation in the system.
pub struct RsyncSizeProbe<'a> {
    cancel: &'a CancellationToken,
    password: Option<&'a str>,
    retry_count: u32,
}

impl<'a> RsyncSizeProbe<'a> {
    pub fn new(cancel: &'a CancellationToken, password: Option<&'a str>, retry_count: u32) -> Self {
        Self { cancel, password, retry_count }
    }

    fn probe(&self, params: &[String], source: &str, dest: &str) -> Result<u64, BackupError> {
        let paths = NodePaths { source: source.to_string(), dest: dest.to_string() };
        let outcome = run_with_retry(
            RSYNC_BINARY,
            params,
            source,
            dest,
            self.retry_count,
            self.password,
            self.cancel,
            &paths,
            0,
            None,
            |_line| {},
        );

        if let Some(fatal) = outcome.fatal_err {
            return Err(fatal);
        }
        if let Some(err) = outcome.session_err {
            return Err(BackupError::PlanningProbeFailed { path: source.to_string(), source: err });
        }

        let result = outcome.result.expect("no session_err implies a result");
        parse_total_size_line(&result.stdout).ok_or_else(|| BackupError::PlanningProbeFailed {
            path: source.to_string(),
            source: RsyncError::MissingTotalSizeLine,
        })
    }
}

impl<'a> SizeProbe for RsyncSizeProbe<'a> {
    fn full_size(&self, source: &str, dest: &str) -> Result<u64, BackupError> {
        self.probe(
            &[
                "--dry-run".to_string(),
                "--compress".to_string(),
                "--recursive".to_string(),
                "--include=*/".to_string(),
            ],
            source,
            dest,
        )
    }

    fn local_size(&self, source: &str, dest: &str) -> Result<u64, BackupError> {
        self.probe(
            &[
                "--dry-run".to_string(),
                "--compress".to_string(),
                "--dirs".to_string(),
            ],
            source,
            dest,
        )
    }
}

/// `clamp(fullSize / 50, 300 MiB, 5000 MiB)` — a target of 50 `rsync` calls
/// per source, recomputed after every root measurement when auto-sizing.
pub fn auto_block_size_bytes(root_full_size: u64) -> u64 {
    let floor = AUTO_BLOCK_SIZE_FLOOR_MIB * MIB;
    let ceil = AUTO_BLOCK_SIZE_CEIL_MIB * MIB;
    (root_full_size / AUTO_BLOCK_SIZE_TARGET_CALLS).clamp(floor, ceil)
}

fn ensure_full_size(tree: &mut DirectoryTree, id: DirNodeId, probe: &dyn SizeProbe) -> Result<(), BackupError> {
    if tree.node(id).full_size.is_some() {
        return Ok(());
    }
    let (source, dest) = {
        let n = tree.node(id);
        (n.paths.source.clone(), n.paths.dest.clone())
    };
    let size = probe.full_size(&source, &dest)?;
    tree.node_mut(id).full_size = Some(size);
    Ok(())
}

fn ensure_local_size(tree: &mut DirectoryTree, id: DirNodeId, probe: &dyn SizeProbe) -> Result<(), BackupError> {
    if tree.node(id).local_size.is_some() {
        return Ok(());
    }
    let (source, dest) = {
        let n = tree.node(id);
        (n.paths.source.clone(), n.paths.dest.clone())
    };
    let size = probe.local_size(&source, &dest)?;
    tree.node_mut(id).local_size = Some(size);
    Ok(())
}

/// The first node (DFS pre-order from `root`) with `measured == false`,
/// preferring an ignored one if any unmeasured ignored node exists.
fn find_candidate(tree: &DirectoryTree) -> Option<DirNodeId> {
    let order = tree.preorder_from(tree.root());
    if let Some(id) = order.iter().find(|&&id| !tree.node(id).measured && tree.node(id).ignored) {
        return Some(*id);
    }
    order.into_iter().find(|&id| !tree.node(id).measured)
}

/// Unmeasured (not yet decided) descendants of `id`, excluding `id` itself,
/// in pre-order.
fn unmeasured_descendants(tree: &DirectoryTree, id: DirNodeId) -> Vec<DirNodeId> {
    tree.subtree(id)
        .into_iter()
        .filter(|&n| n != id && !tree.node(n).measured)
        .collect()
}

/// Closest-to-`target` by `children_count`, ties broken by first encountered
/// in the pre-order scan.
fn closest_by_children_count(tree: &DirectoryTree, candidates: &[DirNodeId], target: u64) -> Option<DirNodeId> {
    candidates
        .iter()
        .copied()
        .min_by_key(|&id| {
            let count = tree.node(id).children_count;
            count.abs_diff(target)
        })
}

/// Among `candidates` with `depth >= target_depth`, the one maximizing
/// `children_count` (ties broken by first encountered). Falls back to the
/// deepest candidate overall when nothing meets the depth floor.
/// Like `Iterator::max_by_key` but breaks ties toward the first-encountered
/// element (`max_by_key` itself keeps the last), matching the planner's
/// depth-first, pre-order tie-break rule.
fn first_max_by_key<I, F>(iter: I, mut key: F) -> Option<DirNodeId>
where
    I: IntoIterator<Item = DirNodeId>,
    F: FnMut(DirNodeId) -> u64,
{
    let mut best: Option<(DirNodeId, u64)> = None;
    for id in iter {
        let k = key(id);
        match best {
            Some((_, best_k)) if k <= best_k => {}
            _ => best = Some((id, k)),
        }
    }
    best.map(|(id, _)| id)
}

fn best_interpolated_candidate(
    tree: &DirectoryTree,
    candidates: &[DirNodeId],
    target_depth: i64,
) -> Option<DirNodeId> {
    let deep_enough: Vec<DirNodeId> = candidates
        .iter()
        .copied()
        .filter(|&id| (tree.node(id).depth as i64) >= target_depth)
        .collect();

    if !deep_enough.is_empty() {
        return first_max_by_key(deep_enough, |id| tree.node(id).children_count);
    }

    first_max_by_key(candidates.iter().copied(), |id| tree.node(id).depth as u64)
}

fn heaviest_unmeasured_child(tree: &DirectoryTree, id: DirNodeId) -> Option<DirNodeId> {
    let unmeasured: Vec<DirNodeId> = tree
        .node(id)
        .children
        .iter()
        .copied()
        .filter(|&c| !tree.node(c).measured)
        .collect();
    first_max_by_key(unmeasured, |c| tree.node(c).children_count)
}

/// Measured `(size, depth)` points collected walking from `id` to the root,
/// nearest first, skipping ancestors whose `full_size` is still unknown.
fn measured_points(tree: &DirectoryTree, id: DirNodeId) -> Vec<(u64, u32)> {
    tree.ancestors_inclusive(id)
        .into_iter()
        .filter_map(|n| tree.node(n).full_size.map(|size| (size, tree.node(n).depth)))
        .collect()
}

/// Linear interpolation between the nearest and farthest measured points,
/// predicting the depth at which `full_size` would cross `block_size`.
/// Ties round away from zero.
fn interpolate_target_depth(near: (u64, u32), far: (u64, u32), block_size: u64) -> i64 {
    let (near_size, near_depth) = (near.0 as f64, near.1 as f64);
    let (far_size, far_depth) = (far.0 as f64, far.1 as f64);

    if (far_size - near_size).abs() < f64::EPSILON {
        return near.1 as i64 + 1;
    }

    let fraction = (block_size as f64 - near_size) / (far_size - near_size);
    let predicted = near_depth + (far_depth - near_depth) * fraction;
    crate::size::round_away_from_zero(predicted)
}

/// Walk the bisect-then-interpolate decision starting at `start`, probing
/// subtree sizes until a node fitting under `block_size` is found (or no
/// further unmeasured descendant remains to subdivide into). Returns the
/// node that should be assigned `RECURSIVE`.
fn decide(
    tree: &mut DirectoryTree,
    start: DirNodeId,
    block_size: u64,
    probe: &dyn SizeProbe,
) -> Result<DirNodeId, BackupError> {
    let mut current = start;

    loop {
        ensure_full_size(tree, current, probe)?;
        if tree.node(current).full_size.unwrap() <= block_size {
            return Ok(current);
        }

        let points = measured_points(tree, current);
        let candidates = unmeasured_descendants(tree, current);
        if candidates.is_empty() {
            // Nothing left to subdivide into; this node is the best we can do.
            return Ok(current);
        }

        let next = if points.len() <= 1 {
            let mid = tree.node(tree.root()).children_count / 2;
            closest_by_children_count(tree, &candidates, mid)
        } else {
            let near = points[0];
            let far = *points.last().unwrap();
            let target_depth = interpolate_target_depth(near, far, block_size);
            best_interpolated_candidate(tree, &candidates, target_depth)
        };

        let Some(next_id) = next else {
            return Ok(current);
        };

        ensure_full_size(tree, next_id, probe)?;

        if tree.node(next_id).full_size.unwrap() <= block_size {
            return Ok(next_id);
        }

        match heaviest_unmeasured_child(tree, next_id) {
            Some(child) => current = child,
            None => return Ok(next_id),
        }
    }
}

/// Set `measured = true` on `id` and every descendant — the subtree is
/// implicitly covered by whatever `backupType` was just assigned to `id`.
fn mark_all_measured(tree: &mut DirectoryTree, id: DirNodeId) {
    for n in tree.subtree(id) {
        tree.node_mut(n).measured = true;
    }
}

/// Walk from `picked`'s parent toward the root, assigning `CONTENT` to every
/// not-yet-measured ancestor so the skip/recurse logic beneath it is
/// actually honored by `rsync`.
fn cover_ancestors(tree: &mut DirectoryTree, picked: DirNodeId, probe: &dyn SizeProbe) -> Result<(), BackupError> {
    let mut cur = tree.node(picked).parent;
    while let Some(id) = cur {
        if tree.node(id).measured {
            break;
        }
        ensure_local_size(tree, id, probe)?;
        let node = tree.node_mut(id);
        node.backup_type = Some(BackupType::Content);
        node.measured = true;
        cur = tree.node(id).parent;
    }
    Ok(())
}

/// Result of a completed planning pass: the block size actually used (after
/// any auto-sizing) for diagnostics and notifier payloads.
pub struct PlanOutcome {
    pub block_size_bytes: u64,
}

/// Assign a `backupType` to every node in `tree`: repeatedly
/// pick an unmeasured candidate, probe, and either skip it (marker file),
/// recurse into it (fits the block-size bound), or mark it `CONTENT` and
/// descend into children.
pub fn plan(
    tree: &mut DirectoryTree,
    config: &SessionConfig,
    probe: &dyn SizeProbe,
    cancel: &CancellationToken,
) -> Result<PlanOutcome, BackupError> {
    let root = tree.root();
    let mut block_size = config.max_block_size_mib.unwrap_or(500) * MIB;

    loop {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let Some(candidate) = find_candidate(tree) else {
            break;
        };

        ensure_full_size(tree, root, probe)?;
        ensure_full_size(tree, candidate, probe)?;

        if config.auto_block_size {
            block_size = auto_block_size_bytes(tree.node(root).full_size.unwrap());
        }

        if tree.node(candidate).ignored {
            tree.node_mut(candidate).backup_type = Some(BackupType::Skip);
            mark_all_measured(tree, candidate);
            cover_ancestors(tree, candidate, probe)?;
            continue;
        }

        let picked = decide(tree, candidate, block_size, probe)?;
        tree.node_mut(picked).backup_type = Some(BackupType::Recursive);
        mark_all_measured(tree, picked);
        cover_ancestors(tree, picked, probe)?;
    }

    Ok(PlanOutcome { block_size_bytes: block_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::file_system::memory::MemoryFileSystem;
    use crate::tree::build_tree;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    struct FakeProbe {
        full: HashMap<String, u64>,
        local: HashMap<String, u64>,
        full_calls: Mutex<u32>,
    }

    impl FakeProbe {
        fn new() -> Self {
            Self {
                full: HashMap::new(),
                local: HashMap::new(),
                full_calls: Mutex::new(0),
            }
        }

        fn with_full(mut self, source: &str, size: u64) -> Self {
            self.full.insert(source.to_string(), size);
            self
        }

        fn with_local(mut self, source: &str, size: u64) -> Self {
            self.local.insert(source.to_string(), size);
            self
        }
    }

    impl SizeProbe for FakeProbe {
        fn full_size(&self, source: &str, _dest: &str) -> Result<u64, BackupError> {
            *self.full_calls.lock().unwrap() += 1;
            self.full
                .get(source)
                .copied()
                .ok_or_else(|| BackupError::PlanningProbeFailed {
                    path: source.to_string(),
                    source: RsyncError::ExtractVersionAndProtocol,
                })
        }

        fn local_size(&self, source: &str, _dest: &str) -> Result<u64, BackupError> {
            Ok(self.local.get(source).copied().unwrap_or(0))
        }
    }

    fn scaffold_single() -> MemoryFileSystem {
        let fs = MemoryFileSystem::new();
        fs.seed_dir(Path::new("/dest/root"));
        fs
    }

    fn scaffold_marker() -> MemoryFileSystem {
        let fs = MemoryFileSystem::new();
        fs.seed_dir(Path::new("/dest/root"));
        fs.seed_dir(Path::new("/dest/root/a"));
        fs.seed_dir(Path::new("/dest/root/a/child"));
        fs.seed_dir(Path::new("/dest/root/b"));
        fs.seed_file(Path::new("/dest/root/a/.nobackup"), "", chrono::Utc::now());
        fs
    }

    #[test]
    fn single_node_tree_gets_one_measurement_and_recursive() {
        let fs = scaffold_single();
        let mut tree = build_tree(&fs, Path::new("/dest/root"), "rsync://host/root", ".nobackup").unwrap();
        let config = SessionConfig::default();
        let probe = FakeProbe::new().with_full("rsync://host/root", 10 * MIB);

        let outcome = plan(&mut tree, &config, &probe, &CancellationToken::new()).unwrap();
        assert!(outcome.block_size_bytes > 0);

        let root = tree.node(tree.root());
        assert_eq!(root.backup_type, Some(BackupType::Recursive));
        assert!(root.measured);
        assert_eq!(*probe.full_calls.lock().unwrap(), 1);
    }

    #[test]
    fn marker_file_skip_propagates_content_to_ancestors() {
        let fs = scaffold_marker();
        let mut tree = build_tree(&fs, Path::new("/dest/root"), "rsync://host/root", ".nobackup").unwrap();
        let config = SessionConfig::default();
        let probe = FakeProbe::new()
            .with_full("rsync://host/root", 1 * MIB)
            .with_full("rsync://host/root/a", 1 * MIB)
            .with_full("rsync://host/root/b", 1 * MIB)
            .with_local("rsync://host/root", 10);

        plan(&mut tree, &config, &probe, &CancellationToken::new()).unwrap();

        let nodes: HashMap<String, DirNodeId> = tree
            .preorder_from(tree.root())
            .into_iter()
            .map(|id| (tree.node(id).name.clone(), id))
            .collect();

        assert_eq!(tree.node(nodes["a"]).backup_type, Some(BackupType::Skip));
        assert_eq!(tree.node(nodes["child"]).backup_type, None);
        assert!(tree.node(nodes["child"]).measured);
        assert_eq!(tree.node(nodes["b"]).backup_type, Some(BackupType::Recursive));
        assert_eq!(tree.node(nodes["root"]).backup_type, Some(BackupType::Content));
    }

    #[test]
    fn every_node_gets_exactly_one_backup_type_or_is_implicitly_covered() {
        let fs = scaffold_marker();
        let mut tree = build_tree(&fs, Path::new("/dest/root"), "rsync://host/root", ".nobackup").unwrap();
        let config = SessionConfig::default();
        let probe = FakeProbe::new()
            .with_full("rsync://host/root", 1 * MIB)
            .with_full("rsync://host/root/a", 1 * MIB)
            .with_full("rsync://host/root/b", 1 * MIB)
            .with_local("rsync://host/root", 10);

        plan(&mut tree, &config, &probe, &CancellationToken::new()).unwrap();

        for id in tree.preorder_from(tree.root()) {
            assert!(tree.node(id).measured, "node {} not measured", tree.node(id).name);
        }
    }

    #[test]
    fn auto_block_size_clamps_to_floor_and_ceiling() {
        assert_eq!(auto_block_size_bytes(50 * 1024 * MIB), 5000 * MIB);
        assert_eq!(auto_block_size_bytes(1024 * MIB), 300 * MIB);
    }

    #[test]
    fn auto_block_size_uses_fifty_call_target_in_range() {
        let root_size = 25_000 * MIB;
        assert_eq!(auto_block_size_bytes(root_size), 500 * MIB);
    }

    #[test]
    fn ignored_root_is_skip_and_marks_whole_subtree_measured() {
        let fs = MemoryFileSystem::new();
        fs.seed_dir(Path::new("/dest/root"));
        fs.seed_dir(Path::new("/dest/root/a"));
        fs.seed_file(Path::new("/dest/root/.nobackup"), "", chrono::Utc::now());
        let mut tree = build_tree(&fs, Path::new("/dest/root"), "rsync://host/root", ".nobackup").unwrap();
        let config = SessionConfig::default();
        let probe = FakeProbe::new().with_full("rsync://host/root", 1 * MIB);

        plan(&mut tree, &config, &probe, &CancellationToken::new()).unwrap();

        let root = tree.node(tree.root());
        assert_eq!(root.backup_type, Some(BackupType::Skip));
        for id in tree.preorder_from(tree.root()) {
            assert!(tree.node(id).measured);
        }
    }

    #[test]
    fn plan_stops_with_cancelled_error_when_token_already_cancelled() {
        let fs = scaffold_single();
        let mut tree = build_tree(&fs, Path::new("/dest/root"), "rsync://host/root", ".nobackup").unwrap();
        let config = SessionConfig::default();
        let probe = FakeProbe::new().with_full("rsync://host/root", 10 * MIB);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = plan(&mut tree, &config, &probe, &cancel).unwrap_err();
        assert!(matches!(err, BackupError::Cancelled));
        assert_eq!(*probe.full_calls.lock().unwrap(), 0);
    }
}
