use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{FileSystem, FsError};

#[derive(Clone)]
enum Entry {
    Dir,
    File { content: String, modified: DateTime<Utc> },
}

/// An in-memory `FileSystem` used by dedup-index and preflight tests so they
/// don't need a real directory tree on disk.
pub struct MemoryFileSystem {
    entries: Mutex<HashMap<PathBuf, Entry>>,
    available_space: Mutex<u64>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(PathBuf::from("/"), Entry::Dir);
        Self {
            entries: Mutex::new(entries),
            available_space: Mutex::new(u64::MAX),
        }
    }

    pub fn set_available_space(&self, bytes: u64) {
        *self.available_space.lock().unwrap() = bytes;
    }

    pub fn seed_file(&self, path: &Path, content: &str, modified: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap();
        let mut cur = PathBuf::new();
        for comp in path.parent().unwrap_or_else(|| Path::new("/")).components() {
            cur.push(comp);
            entries.entry(cur.clone()).or_insert(Entry::Dir);
        }
        entries.insert(
            path.to_path_buf(),
            Entry::File { content: content.to_string(), modified },
        );
    }

    pub fn seed_dir(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap();
        let mut cur = PathBuf::new();
        for comp in path.components() {
            cur.push(comp);
            entries.entry(cur.clone()).or_insert(Entry::Dir);
        }
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.entries.lock().unwrap().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries.lock().unwrap().get(path), Some(Entry::Dir))
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.entries.lock().unwrap().get(path), Some(Entry::File { .. }))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        self.seed_dir(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let mut entries = self.entries.lock().unwrap();
        let moved: Vec<(PathBuf, Entry)> = entries
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect();
        if moved.is_empty() {
            return Err(FsError::NotFound(from.display().to_string()));
        }
        for (p, e) in moved {
            let rest = p.strip_prefix(from).unwrap();
            entries.remove(&p);
            entries.insert(to.join(rest), e);
        }
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        let entries = self.entries.lock().unwrap();
        if !matches!(entries.get(path), Some(Entry::Dir)) {
            return Err(FsError::NotADirectory(path.display().to_string()));
        }
        let mut children: Vec<PathBuf> = entries
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        children.sort();
        Ok(children)
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        match self.entries.lock().unwrap().get(path) {
            Some(Entry::File { content, .. }) => Ok(content.clone()),
            Some(Entry::Dir) => Err(FsError::NotADirectory(path.display().to_string())),
            None => Err(FsError::NotFound(path.display().to_string())),
        }
    }

    fn write(&self, path: &Path, content: &str) -> Result<(), FsError> {
        self.seed_file(path, content, Utc::now());
        Ok(())
    }

    fn append(&self, path: &Path, content: &str) -> Result<(), FsError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(path) {
            Some(Entry::File { content: existing, modified }) => {
                existing.push_str(content);
                *modified = Utc::now();
                Ok(())
            }
            Some(Entry::Dir) => Err(FsError::NotADirectory(path.display().to_string())),
            None => {
                drop(entries);
                self.seed_file(path, content, Utc::now());
                Ok(())
            }
        }
    }

    fn modified_time(&self, path: &Path) -> Result<DateTime<Utc>, FsError> {
        match self.entries.lock().unwrap().get(path) {
            Some(Entry::File { modified, .. }) => Ok(*modified),
            _ => Err(FsError::NotFound(path.display().to_string())),
        }
    }

    fn available_space(&self, _path: &Path) -> Result<u64, FsError> {
        Ok(*self.available_space.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_file_round_trips() {
        let fs = MemoryFileSystem::new();
        fs.seed_file(Path::new("/dest/session/sig"), "abc", Utc::now());
        assert!(fs.is_file(Path::new("/dest/session/sig")));
        assert!(fs.is_dir(Path::new("/dest/session")));
        assert_eq!(fs.read_to_string(Path::new("/dest/session/sig")).unwrap(), "abc");
    }

    #[test]
    fn rename_moves_subtree() {
        let fs = MemoryFileSystem::new();
        fs.seed_file(Path::new("/dest/incomplete/sig"), "abc", Utc::now());
        fs.rename(Path::new("/dest/incomplete"), Path::new("/dest/complete")).unwrap();
        assert!(!fs.exists(Path::new("/dest/incomplete")));
        assert!(fs.is_file(Path::new("/dest/complete/sig")));
    }

    #[test]
    fn append_to_missing_file_creates_it() {
        let fs = MemoryFileSystem::new();
        fs.append(Path::new("/dest/log.txt"), "first\n").unwrap();
        assert_eq!(fs.read_to_string(Path::new("/dest/log.txt")).unwrap(), "first\n");
    }

    #[test]
    fn append_to_existing_file_grows_content() {
        let fs = MemoryFileSystem::new();
        fs.seed_file(Path::new("/dest/log.txt"), "first\n", Utc::now());
        fs.append(Path::new("/dest/log.txt"), "second\n").unwrap();
        assert_eq!(
            fs.read_to_string(Path::new("/dest/log.txt")).unwrap(),
            "first\nsecond\n"
        );
    }

    #[test]
    fn read_dir_lists_direct_children_only() {
        let fs = MemoryFileSystem::new();
        fs.seed_dir(Path::new("/dest/a"));
        fs.seed_dir(Path::new("/dest/b"));
        fs.seed_file(Path::new("/dest/a/nested"), "x", Utc::now());
        let children = fs.read_dir(Path::new("/dest")).unwrap();
        assert_eq!(children, vec![PathBuf::from("/dest/a"), PathBuf::from("/dest/b")]);
    }
}
