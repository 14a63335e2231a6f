use std::path::Path;

use crate::error::BackupError;
use crate::file_system::FileSystem;
use crate::path_util::{join_path, last_segment};

/// The disposition the planner eventually assigns every node. Left `None`
/// until the planner visits the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    Recursive,
    Content,
    Skip,
}

/// Index into `DirectoryTree::nodes`. The tree is an arena: parent and
/// children are indices rather than owned/`Rc` pointers, so the planner can
/// walk toward the root without fighting the borrow checker.
pub type DirNodeId = usize;

/// The `(source, dest)` path pair carried by every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePaths {
    pub source: String,
    pub dest: String,
}

#[derive(Debug, Clone)]
pub struct DirNode {
    pub name: String,
    pub parent: Option<DirNodeId>,
    pub children: Vec<DirNodeId>,
    pub paths: NodePaths,
    pub ignored: bool,

    pub local_size: Option<u64>,
    pub full_size: Option<u64>,
    pub children_count: u64,
    pub depth: u32,
    pub measured: bool,
    pub backup_type: Option<BackupType>,
}

impl DirNode {
    fn new(name: String, parent: Option<DirNodeId>, paths: NodePaths, ignored: bool) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            paths,
            ignored,
            local_size: None,
            full_size: None,
            children_count: 1,
            depth: 0,
            measured: false,
            backup_type: None,
        }
    }
}

/// In-memory tree of directories, built once during planning from a
/// metadata-only destination scaffold and thereafter mutated only by the
/// planner's metric fields until execution, which treats it as read-only.
pub struct DirectoryTree {
    nodes: Vec<DirNode>,
    root: DirNodeId,
}

impl DirectoryTree {
    pub fn root(&self) -> DirNodeId {
        self.root
    }

    pub fn node(&self, id: DirNodeId) -> &DirNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: DirNodeId) -> &mut DirNode {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first, pre-order iteration starting at `id`, children visited in
    /// the (name-sorted) order they were built — the tie-break rule the
    /// planner relies on for "first encountered".
    pub fn preorder_from(&self, id: DirNodeId) -> Vec<DirNodeId> {
        let mut out = Vec::new();
        self.preorder_into(id, &mut out);
        out
    }

    fn preorder_into(&self, id: DirNodeId, out: &mut Vec<DirNodeId>) {
        out.push(id);
        for &child in &self.nodes[id].children {
            self.preorder_into(child, out);
        }
    }

    /// All nodes on the path from `id` up to (and including) the root, nearest
    /// first.
    pub fn ancestors_inclusive(&self, id: DirNodeId) -> Vec<DirNodeId> {
        let mut out = Vec::new();
        let mut cur = Some(id);
        while let Some(node_id) = cur {
            out.push(node_id);
            cur = self.nodes[node_id].parent;
        }
        out
    }

    /// Every descendant of `id`, `id` itself included, in pre-order.
    pub fn subtree(&self, id: DirNodeId) -> Vec<DirNodeId> {
        self.preorder_from(id)
    }

    /// Recompute `depth` and `children_count` bottom-up from the current
    /// parent/child shape. Called once after the tree is built; the planner
    /// never needs to call this again since it never reshapes the tree.
    fn fill_depth_and_children_count(&mut self) {
        fn visit(tree: &mut DirectoryTree, id: DirNodeId, depth: u32) -> u64 {
            tree.nodes[id].depth = depth;
            let children: Vec<DirNodeId> = tree.nodes[id].children.clone();
            let mut count = 1u64;
            for child in children {
                count += visit(tree, child, depth + 1);
            }
            tree.nodes[id].children_count = count;
            count
        }
        visit(self, self.root, 0);
    }
}

/// Build a `DirectoryTree` from a destination scaffold already materialized
/// on disk by a metadata-only probe (directory skeleton plus marker files
/// only — no regular file contents). `source_root`/`dest_root` seed the root
/// node's paths; every descendant's paths are derived by joining the same
/// relative segment onto both sides.
pub fn build_tree(
    fs: &dyn FileSystem,
    dest_scaffold_root: &Path,
    source_root: &str,
    marker_file_name: &str,
) -> Result<DirectoryTree, BackupError> {
    let mut nodes = Vec::new();
    let root_paths = NodePaths {
        source: source_root.to_string(),
        dest: dest_scaffold_root.display().to_string(),
    };
    let root_name = last_segment(source_root).to_string();
    let root_ignored = has_marker(fs, dest_scaffold_root, marker_file_name)?;
    nodes.push(DirNode::new(root_name, None, root_paths, root_ignored));
    let root = 0;

    build_children(fs, &mut nodes, root, dest_scaffold_root, source_root, marker_file_name)?;

    let mut tree = DirectoryTree { nodes, root };
    tree.fill_depth_and_children_count();
    Ok(tree)
}

fn has_marker(fs: &dyn FileSystem, dir: &Path, marker_file_name: &str) -> Result<bool, BackupError> {
    Ok(fs
        .read_dir(dir)?
        .iter()
        .any(|p| p.file_name().map(|n| n == marker_file_name.as_ref()).unwrap_or(false)))
}

fn build_children(
    fs: &dyn FileSystem,
    nodes: &mut Vec<DirNode>,
    parent_id: DirNodeId,
    dest_dir: &Path,
    source_dir: &str,
    marker_file_name: &str,
) -> Result<(), BackupError> {
    let mut entries = fs.read_dir(dest_dir)?;
    entries.sort();

    for entry in entries {
        if !fs.is_dir(&entry) {
            continue;
        }
        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let child_source = join_path(source_dir, &name);
        let child_paths = NodePaths {
            source: child_source.clone(),
            dest: entry.display().to_string(),
        };
        let ignored = has_marker(fs, &entry, marker_file_name)?;
        nodes.push(DirNode::new(name, Some(parent_id), child_paths, ignored));
        let child_id = nodes.len() - 1;
        nodes[parent_id].children.push(child_id);

        build_children(fs, nodes, child_id, &entry, &child_source, marker_file_name)?;
    }

    Ok(())
}
