use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

use super::{describe_failure, RsyncClient, RsyncError, RsyncResult};

/// Spawns the real `rsync` binary, piping stdout/stderr into the returned
/// `RsyncResult` (or a typed error). `RSYNC_PASSWORD` is always set — empty
/// when no password was given — so the daemon never drops into an
/// interactive prompt.
pub struct ProcessRsyncClient {
    rsync_binary: String,
}

impl ProcessRsyncClient {
    pub fn new() -> Self {
        Self {
            rsync_binary: "rsync".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            rsync_binary: binary.into(),
        }
    }
}

impl Default for ProcessRsyncClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RsyncClient for ProcessRsyncClient {
    fn execute(&self, args: &[String], password: Option<&str>) -> Result<RsyncResult, RsyncError> {
        let command_str = format!("{} {}", self.rsync_binary, args.join(" "));

        let mut child = Command::new(&self.rsync_binary)
            .args(args)
            .env("RSYNC_PASSWORD", password.unwrap_or(""))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RsyncError::RsyncNotFound
                } else {
                    RsyncError::IoError(e.to_string())
                }
            })?;

        // stdout and stderr are drained on dedicated threads rather than
        // sequentially: a dry-run probe can emit enough of either stream to
        // fill its pipe buffer, and reading one to completion before
        // starting the other would deadlock against the child's own
        // blocking write.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_thread = std::thread::spawn(move || -> Vec<String> {
            match stdout {
                Some(stdout) => BufReader::new(stdout).lines().filter_map(|l| l.ok()).collect(),
                None => Vec::new(),
            }
        });
        let stderr_thread = std::thread::spawn(move || -> Vec<String> {
            match stderr {
                Some(stderr) => BufReader::new(stderr).lines().filter_map(|l| l.ok()).collect(),
                None => Vec::new(),
            }
        });

        let status = child.wait().map_err(|e| RsyncError::IoError(e.to_string()))?;
        let stdout_lines = stdout_thread.join().unwrap_or_default();
        let stderr_lines = stderr_thread.join().unwrap_or_default();
        let stderr_output = stderr_lines.join("\n");
        let exit_code = status.code().unwrap_or(-1);

        if exit_code != 0 {
            return Err(RsyncError::CallFailed {
                exit_code,
                description: describe_failure(exit_code, &stderr_output),
            });
        }

        Ok(RsyncResult {
            exit_code,
            stdout: stdout_lines.join("\n"),
            stderr: stderr_output,
            command: command_str,
        })
    }

    fn version(&self) -> Result<String, RsyncError> {
        let output = Command::new(&self.rsync_binary)
            .arg("--version")
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RsyncError::RsyncNotFound
                } else {
                    RsyncError::IoError(e.to_string())
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .find(|l| l.contains("version") && l.contains("protocol version"))
            .ok_or(RsyncError::ExtractVersionAndProtocol)?;
        Ok(first_line.to_string())
    }
}
