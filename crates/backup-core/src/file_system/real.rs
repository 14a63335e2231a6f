use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{FileSystem, FsError};

pub struct RealFileSystem;

impl RealFileSystem {
    pub fn new() -> Self {
        Self
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> FsError {
        match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                FsError::PermissionDenied(path.display().to_string())
            }
            _ => FsError::IoError(format!("{}: {}", path.display(), e)),
        }
    }
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(|e| Self::map_io_error(e, path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        fs::rename(from, to).map_err(|e| Self::map_io_error(e, from))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_dir_all(path).map_err(|e| Self::map_io_error(e, path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        if !path.is_dir() {
            return Err(FsError::NotADirectory(path.display().to_string()));
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| Self::map_io_error(e, path))? {
            let entry = entry.map_err(|e| Self::map_io_error(e, path))?;
            entries.push(entry.path());
        }
        Ok(entries)
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        fs::read_to_string(path).map_err(|e| Self::map_io_error(e, path))
    }

    fn write(&self, path: &Path, content: &str) -> Result<(), FsError> {
        fs::write(path, content).map_err(|e| Self::map_io_error(e, path))
    }

    fn append(&self, path: &Path, content: &str) -> Result<(), FsError> {
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Self::map_io_error(e, path))?;
        file.write_all(content.as_bytes())
            .map_err(|e| Self::map_io_error(e, path))
    }

    fn modified_time(&self, path: &Path) -> Result<DateTime<Utc>, FsError> {
        let meta = fs::metadata(path).map_err(|e| Self::map_io_error(e, path))?;
        let modified = meta.modified().map_err(|e| Self::map_io_error(e, path))?;
        Ok(DateTime::<Utc>::from(modified))
    }

    #[cfg(unix)]
    fn available_space(&self, path: &Path) -> Result<u64, FsError> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| FsError::IoError(e.to_string()))?;

        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(Self::map_io_error(std::io::Error::last_os_error(), path));
            }
            Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
        }
    }

    #[cfg(not(unix))]
    fn available_space(&self, _path: &Path) -> Result<u64, FsError> {
        Ok(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        let fs = RealFileSystem::new();
        fs.write(&file, "hello").unwrap();
        assert_eq!(fs.read_to_string(&file).unwrap(), "hello");
        assert!(fs.is_file(&file));
        assert!(!fs.is_dir(&file));
    }

    #[test]
    fn create_dir_all_then_read_dir_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let fs = RealFileSystem::new();
        fs.create_dir_all(&nested).unwrap();
        assert!(fs.is_dir(&nested));
        let entries = fs.read_dir(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn rename_moves_directory() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("incomplete");
        let to = dir.path().join("complete");
        let fs = RealFileSystem::new();
        fs.create_dir_all(&from).unwrap();
        fs.rename(&from, &to).unwrap();
        assert!(!fs.exists(&from));
        assert!(fs.exists(&to));
    }

    #[test]
    fn append_creates_file_then_grows_it() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("log.txt");
        let fs = RealFileSystem::new();
        fs.append(&file, "line one\n").unwrap();
        fs.append(&file, "line two\n").unwrap();
        assert_eq!(fs.read_to_string(&file).unwrap(), "line one\nline two\n");
    }

    #[test]
    fn read_to_string_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem::new();
        let err = fs.read_to_string(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err, FsError::NotFound(dir.path().join("missing").display().to_string()));
    }
}
