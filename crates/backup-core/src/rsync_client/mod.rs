pub mod process;
pub mod runner;

use thiserror::Error;

/// Result of one `rsync` invocation that exited successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct RsyncResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub command: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RsyncError {
    #[error("rsync call failed (exit code {exit_code}): {description}")]
    CallFailed { exit_code: i32, description: String },

    #[error("rsync not found on system")]
    RsyncNotFound,

    #[error("I/O error spawning rsync: {0}")]
    IoError(String),

    #[error("operation cancelled")]
    ProcessTerminated,

    #[error("could not determine rsync version/protocol from output")]
    ExtractVersionAndProtocol,

    #[error("could not find a \"total size is\" line in rsync output")]
    MissingTotalSizeLine,
}

/// Gloss for rsync's documented exit codes, used to build a `CallFailed`
/// description alongside any `@ERROR:` line scraped from stderr.
pub fn exit_code_gloss(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "syntax or usage error",
        2 => "protocol incompatibility",
        3 => "errors selecting input/output files, dirs",
        4 => "requested action not supported",
        5 => "error starting client-server protocol",
        6 => "daemon unable to append to log-file",
        10 => "error in socket I/O",
        11 => "error in file I/O",
        12 => "error in rsync protocol data stream",
        13 => "errors with program diagnostics",
        14 => "error in IPC code",
        20 => "received SIGUSR1 or SIGINT",
        21 => "some error returned by waitpid()",
        22 => "error allocating core memory buffers",
        23 => "partial transfer due to error",
        24 => "partial transfer due to vanished source files",
        25 => "the --max-delete limit stopped deletions",
        30 => "timeout in data send/receive",
        35 => "timeout waiting for daemon connection",
        255 => "unknown rsync exit code",
        _ => "unrecognized rsync exit code",
    }
}

/// Scan stderr for a line matching `^@ERROR:(.*)$` and build a `CallFailed`
/// description combining it with the exit-code gloss.
pub fn describe_failure(exit_code: i32, stderr: &str) -> String {
    let error_line = stderr
        .lines()
        .find_map(|line| line.strip_prefix("@ERROR:"))
        .map(|s| s.trim());

    match error_line {
        Some(msg) if !msg.is_empty() => format!("{} ({})", msg, exit_code_gloss(exit_code)),
        _ => exit_code_gloss(exit_code).to_string(),
    }
}

/// Abstraction over invoking the external `rsync` binary. The production
/// implementation spawns a real child process; tests substitute a scripted
/// double.
pub trait RsyncClient: Send + Sync {
    /// Run `rsync` with the given arguments (already including source/dest)
    /// to completion, returning its result or a typed error.
    fn execute(&self, args: &[String], password: Option<&str>) -> Result<RsyncResult, RsyncError>;

    /// Query `rsync --version`, returning the first line of output.
    fn version(&self) -> Result<String, RsyncError>;
}
