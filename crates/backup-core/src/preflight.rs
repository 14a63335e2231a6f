use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::SourceModule;
use crate::file_system::FileSystem;
use crate::rsync_client::RsyncClient;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CheckType {
    RsyncInstalled,
    SourceReachable,
    DestinationWritable,
    DiskSpace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationCheck {
    pub check_type: CheckType,
    pub passed: bool,
    pub message: String,
    pub severity: CheckSeverity,
}

/// A full preflight report, returned to the caller before the backup stage
/// commits. Never run implicitly as part of `SessionDriver::run` — an
/// embedding application decides when to call it and what to do with a
/// failing report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreflightReport {
    pub checks: Vec<ValidationCheck>,
    pub overall_pass: bool,
}

/// Run the four preflight checks: rsync binary present, every source
/// reachable (a metadata-only dry-run probe), destination root writable,
/// and free space on the destination at least `planned_bytes`.
pub fn run_preflight(
    sources: &[SourceModule],
    dest_root: &Path,
    planned_bytes: u64,
    fs: &dyn FileSystem,
    rsync: &dyn RsyncClient,
) -> PreflightReport {
    let mut checks = Vec::new();

    checks.push(check_rsync_installed(rsync));
    for source in sources {
        checks.push(check_source_reachable(source, rsync));
    }
    checks.push(check_destination_writable(dest_root, fs));
    checks.push(check_disk_space(dest_root, planned_bytes, fs));

    let overall_pass = checks
        .iter()
        .all(|c| c.passed || c.severity == CheckSeverity::Warning);

    PreflightReport { checks, overall_pass }
}

fn check_rsync_installed(rsync: &dyn RsyncClient) -> ValidationCheck {
    match rsync.version() {
        Ok(version) => ValidationCheck {
            check_type: CheckType::RsyncInstalled,
            passed: true,
            message: format!("rsync is installed ({})", version.trim()),
            severity: CheckSeverity::Error,
        },
        Err(e) => ValidationCheck {
            check_type: CheckType::RsyncInstalled,
            passed: false,
            message: format!("rsync is not usable: {}", e),
            severity: CheckSeverity::Error,
        },
    }
}

fn check_source_reachable(source: &SourceModule, rsync: &dyn RsyncClient) -> ValidationCheck {
    let args = vec![
        "--dry-run".to_string(),
        "--list-only".to_string(),
        source.source_url.clone(),
    ];
    match rsync.execute(&args, source.password.as_deref()) {
        Ok(_) => ValidationCheck {
            check_type: CheckType::SourceReachable,
            passed: true,
            message: format!("source reachable: {}", source.source_url),
            severity: CheckSeverity::Error,
        },
        Err(e) => ValidationCheck {
            check_type: CheckType::SourceReachable,
            passed: false,
            message: format!("source unreachable ({}): {}", source.source_url, e),
            severity: CheckSeverity::Error,
        },
    }
}

fn check_destination_writable(dest_root: &Path, fs: &dyn FileSystem) -> ValidationCheck {
    if fs.exists(dest_root) && fs.is_dir(dest_root) {
        return ValidationCheck {
            check_type: CheckType::DestinationWritable,
            passed: true,
            message: format!("destination directory exists: {}", dest_root.display()),
            severity: CheckSeverity::Error,
        };
    }
    if fs.exists(dest_root) {
        return ValidationCheck {
            check_type: CheckType::DestinationWritable,
            passed: false,
            message: format!("destination exists but is not a directory: {}", dest_root.display()),
            severity: CheckSeverity::Error,
        };
    }
    let parent_ok = dest_root
        .parent()
        .map(|p| fs.exists(p) && fs.is_dir(p))
        .unwrap_or(false);
    ValidationCheck {
        check_type: CheckType::DestinationWritable,
        passed: parent_ok,
        message: if parent_ok {
            format!("destination does not exist yet, but parent is valid: {}", dest_root.display())
        } else {
            format!("neither destination nor its parent exist: {}", dest_root.display())
        },
        severity: CheckSeverity::Error,
    }
}

fn check_disk_space(dest_root: &Path, planned_bytes: u64, fs: &dyn FileSystem) -> ValidationCheck {
    match fs.available_space(dest_root) {
        Ok(available) if available >= planned_bytes => ValidationCheck {
            check_type: CheckType::DiskSpace,
            passed: true,
            message: format!(
                "{} available, {} planned",
                crate::size::human_readable_bytes(available),
                crate::size::human_readable_bytes(planned_bytes)
            ),
            severity: CheckSeverity::Error,
        },
        Ok(available) => ValidationCheck {
            check_type: CheckType::DiskSpace,
            passed: false,
            message: format!(
                "insufficient space: {} available, {} planned",
                crate::size::human_readable_bytes(available),
                crate::size::human_readable_bytes(planned_bytes)
            ),
            severity: CheckSeverity::Error,
        },
        Err(e) => ValidationCheck {
            check_type: CheckType::DiskSpace,
            passed: false,
            message: format!("could not determine free space: {}", e),
            severity: CheckSeverity::Warning,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_system::memory::MemoryFileSystem;
    use crate::rsync_client::{RsyncError, RsyncResult};
    use std::path::PathBuf;

    struct FakeClient {
        version_ok: bool,
        execute_ok: bool,
    }

    impl RsyncClient for FakeClient {
        fn execute(&self, _args: &[String], _password: Option<&str>) -> Result<RsyncResult, RsyncError> {
            if self.execute_ok {
                Ok(RsyncResult { exit_code: 0, stdout: String::new(), stderr: String::new(), command: String::new() })
            } else {
                Err(RsyncError::CallFailed { exit_code: 5, description: "refused".to_string() })
            }
        }

        fn version(&self) -> Result<String, RsyncError> {
            if self.version_ok {
                Ok("version 3.2.7  protocol version 31".to_string())
            } else {
                Err(RsyncError::RsyncNotFound)
            }
        }
    }

    #[test]
    fn all_checks_pass_reports_overall_pass() {
        let fs = MemoryFileSystem::new();
        fs.seed_dir(&PathBuf::from("/dest"));
        fs.set_available_space(10_000);
        let client = FakeClient { version_ok: true, execute_ok: true };

        let sources = vec![SourceModule::new("rsync://host/a", "a")];
        let report = run_preflight(&sources, Path::new("/dest"), 100, &fs, &client);
        assert!(report.overall_pass);
    }

    #[test]
    fn missing_rsync_fails_overall() {
        let fs = MemoryFileSystem::new();
        fs.seed_dir(&PathBuf::from("/dest"));
        let client = FakeClient { version_ok: false, execute_ok: true };

        let report = run_preflight(&[], Path::new("/dest"), 0, &fs, &client);
        assert!(!report.overall_pass);
    }

    #[test]
    fn unreachable_source_fails_overall() {
        let fs = MemoryFileSystem::new();
        fs.seed_dir(&PathBuf::from("/dest"));
        let client = FakeClient { version_ok: true, execute_ok: false };

        let sources = vec![SourceModule::new("rsync://host/a", "a")];
        let report = run_preflight(&sources, Path::new("/dest"), 0, &fs, &client);
        assert!(!report.overall_pass);
        assert!(report.checks.iter().any(|c| c.check_type == CheckType::SourceReachable && !c.passed));
    }

    #[test]
    fn insufficient_disk_space_fails_overall() {
        let fs = MemoryFileSystem::new();
        fs.seed_dir(&PathBuf::from("/dest"));
        fs.set_available_space(10);
        let client = FakeClient { version_ok: true, execute_ok: true };

        let report = run_preflight(&[], Path::new("/dest"), 1_000_000, &fs, &client);
        assert!(!report.overall_pass);
    }

    #[test]
    fn missing_destination_with_valid_parent_passes_as_warning_free() {
        let fs = MemoryFileSystem::new();
        fs.seed_dir(&PathBuf::from("/dest"));
        fs.set_available_space(10_000);
        let client = FakeClient { version_ok: true, execute_ok: true };

        let report = run_preflight(&[], Path::new("/dest/session"), 0, &fs, &client);
        assert!(report.overall_pass);
    }
}
