use std::path::{Path, PathBuf};

use crate::error::BackupError;
use crate::file_system::FileSystem;
use crate::log_scrub::redact;

pub const BACKUP_LOG_FILE_NAME: &str = "~backup_log~.log";
pub const RSYNC_LOG_FILE_NAME: &str = "~rsync_log~.log";

/// The two on-disk log files a session owns: a driver-level narrative
/// always written, and an optional raw `rsync` transcript gated by
/// `enableRsyncLog`/`enableIntensiveRsyncLog`. Appended to incrementally so
/// a crash mid-session still leaves useful diagnostics behind in the
/// incomplete destination directory.
pub struct SessionLog<'a> {
    fs: &'a dyn FileSystem,
    backup_log_path: PathBuf,
    rsync_log_path: Option<PathBuf>,
    intensive: bool,
    redact_secret: Option<String>,
}

impl<'a> SessionLog<'a> {
    pub fn open(
        fs: &'a dyn FileSystem,
        session_dir: &Path,
        enable_rsync_log: bool,
        enable_intensive_rsync_log: bool,
    ) -> Result<Self, BackupError> {
        let backup_log_path = session_dir.join(BACKUP_LOG_FILE_NAME);
        fs.write(&backup_log_path, "")?;

        let rsync_log_path = if enable_rsync_log || enable_intensive_rsync_log {
            let path = session_dir.join(RSYNC_LOG_FILE_NAME);
            fs.write(&path, "")?;
            Some(path)
        } else {
            None
        };

        Ok(Self {
            fs,
            backup_log_path,
            rsync_log_path,
            intensive: enable_intensive_rsync_log,
            redact_secret: None,
        })
    }

    /// Scrub this literal substring out of every subsequent line before it
    /// is written, so a source's password never reaches disk in cleartext.
    pub fn set_redact_secret(&mut self, secret: Option<String>) {
        self.redact_secret = secret.filter(|s| !s.is_empty());
    }

    fn scrubbed(&self, line: &str) -> String {
        match &self.redact_secret {
            Some(secret) => redact(line, secret),
            None => line.to_string(),
        }
    }

    /// Append one narrative line to `~backup_log~.log`, e.g. a plan or
    /// folder event. Errors here are destination I/O and therefore fatal.
    pub fn log(&self, line: &str) -> Result<(), BackupError> {
        let scrubbed = self.scrubbed(line);
        self.fs.append(&self.backup_log_path, &format!("{}\n", scrubbed))?;
        log::info!("{}", scrubbed);
        Ok(())
    }

    /// Append the command about to run to the optional rsync transcript,
    /// when enabled at either verbosity.
    pub fn log_command(&self, command: &str) -> Result<(), BackupError> {
        if let Some(path) = &self.rsync_log_path {
            self.fs.append(path, &format!("$ {}\n", self.scrubbed(command)))?;
        }
        Ok(())
    }

    /// Append one line of `rsync`'s own stdout, only when intensive logging
    /// is on — the non-intensive setting records just the command and its
    /// outcome, not every line.
    pub fn log_rsync_line(&self, line: &str) -> Result<(), BackupError> {
        if self.intensive {
            if let Some(path) = &self.rsync_log_path {
                self.fs.append(path, &format!("{}\n", self.scrubbed(line)))?;
            }
        }
        Ok(())
    }
}
