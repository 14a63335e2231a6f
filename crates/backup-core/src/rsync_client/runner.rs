use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{describe_failure, RsyncError, RsyncResult};
use crate::error::BackupError;
use crate::tree::NodePaths;

/// Shared cancellation flag threaded through an entire session. Cloning it
/// shares the same underlying flag — cancelling any clone cancels all of
/// them.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Flags `run_with_retry` prepends to every call, ahead of whatever the
/// caller asked for.
const DEFAULT_FLAGS: [&str; 2] = ["--progress", "--verbose"];

/// `DEFAULT_FLAGS ++ params ++ [source, dest]` — split out as a pure
/// function so the prepend rule is testable without spawning a process.
fn build_args(params: &[String], source: &str, dest: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(DEFAULT_FLAGS.len() + params.len() + 2);
    args.extend(DEFAULT_FLAGS.iter().map(|f| f.to_string()));
    args.extend(params.iter().cloned());
    args.push(source.to_string());
    args.push(dest.to_string());
    args
}

/// Spawn `rsync`, feeding each stdout line to `stdout_sink`, while honoring
/// `cancel`: a watcher thread kills the child the moment the token flips.
/// Returns `ProcessTerminated` if cancellation won the race.
fn spawn_and_wait(
    binary: &str,
    args: &[String],
    password: Option<&str>,
    cancel: &CancellationToken,
    mut stdout_sink: impl FnMut(&str),
) -> Result<RsyncResult, RsyncError> {
    let command_str = format!("{} {}", binary, args.join(" "));

    let child = Command::new(binary)
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

    let child = Arc::new(Mutex::new(child));

    let stdout = child
        .lock()
        .expect("lock poisoned")
        .stdout
        .take()
        .ok_or_else(|| RsyncError::IoError("failed to capture stdout".to_string()))?;
    let stderr = child
        .lock()
        .expect("lock poisoned")
        .stderr
        .take()
        .ok_or_else(|| RsyncError::IoError("failed to capture stderr".to_string()))?;

    let stdout_lines = Arc::new(Mutex::new(Vec::new()));
    let stdout_lines_writer = Arc::clone(&stdout_lines);
    let stdout_thread = std::thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines().filter_map(|l| l.ok()) {
            stdout_lines_writer.lock().expect("lock poisoned").push(line);
        }
    });

    let stderr_lines = Arc::new(Mutex::new(Vec::new()));
    let stderr_lines_writer = Arc::clone(&stderr_lines);
    let stderr_thread = std::thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines().filter_map(|l| l.ok()) {
            stderr_lines_writer.lock().expect("lock poisoned").push(line);
        }
    });

    let watcher_cancel = cancel.clone();
    let watcher_child = Arc::clone(&child);
    let watcher_done = Arc::new(AtomicBool::new(false));
    let watcher_done_reader = Arc::clone(&watcher_done);
    let watcher = std::thread::spawn(move || {
        while !watcher_done_reader.load(Ordering::SeqCst) {
            if watcher_cancel.is_cancelled() {
                if let Ok(mut c) = watcher_child.lock() {
                    let _ = c.kill();
                }
                return;
            }
            std::thread::sleep(CANCEL_POLL_INTERVAL);
        }
    });

    let status = {
        let mut c = child.lock().expect("lock poisoned");
        c.wait().map_err(|e| RsyncError::IoError(e.to_string()))?
    };
    watcher_done.store(true, Ordering::SeqCst);
    let _ = stdout_thread.join();
    let _ = stderr_thread.join();
    let _ = watcher.join();

    if cancel.is_cancelled() {
        return Err(RsyncError::ProcessTerminated);
    }

    for line in stdout_lines.lock().expect("lock poisoned").iter() {
        stdout_sink(line);
    }

    let exit_code = status.code().unwrap_or(-1);
    let stderr_joined = stderr_lines.lock().expect("lock poisoned").join("\n");

    if exit_code != 0 {
        return Err(RsyncError::CallFailed {
            exit_code,
            description: describe_failure(exit_code, &stderr_joined),
        });
    }

    Ok(RsyncResult {
        exit_code,
        stdout: stdout_lines.lock().expect("lock poisoned").join("\n"),
        stderr: stderr_joined,
        command: command_str,
    })
}

/// Decision an `on_error` recovery callback returns after a retryable
/// failure: how many retries remain, and whether the failure should be
/// escalated to fatal regardless of retries left.
pub struct ErrorDecision {
    pub retries_left: u32,
    pub fatal: Option<BackupError>,
}

/// `onError(err, paths, predictedSize, repeatIdx, retriesLeft)` per §4.C —
/// `paths` and `predictedSize` are threaded through so a recovery callback
/// can show the user which folder is stuck and how large the pending
/// transfer is (the out-of-disk-space prompt this callback exists for).
pub type OnError<'a> = dyn Fn(&RsyncError, &NodePaths, u64, u32, u32) -> ErrorDecision + 'a;

/// Outcome of `run_with_retry`: the three independent results the caller
/// needs — a session-terminal error, a retryable error kept only
/// for logging, and a fatal error that must abort immediately.
#[derive(Default)]
pub struct RetryOutcome {
    pub result: Option<RsyncResult>,
    pub session_err: Option<RsyncError>,
    pub retry_err: Option<RsyncError>,
    pub fatal_err: Option<BackupError>,
}

/// Run `rsync binary params... source dest` to completion, retrying
/// retryable failures up to `retry_count` times (already clamped to 0..=5 by
/// the caller). Cancellation always wins: it is surfaced as `ProcessTerminated`
/// in both `session_err` and `fatal_err`, and no retry is attempted.
#[allow(clippy::too_many_arguments)]
pub fn run_with_retry(
    binary: &str,
    params: &[String],
    source: &str,
    dest: &str,
    retry_count: u32,
    password: Option<&str>,
    cancel: &CancellationToken,
    paths: &NodePaths,
    predicted_size: u64,
    on_error: Option<&OnError<'_>>,
    mut stdout_sink: impl FnMut(&str),
) -> RetryOutcome {
    let args = build_args(params, source, dest);

    let mut retries_left = retry_count;
    let mut repeat_idx = 0u32;
    let mut last_retryable: Option<RsyncError> = None;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: None,
                session_err: Some(RsyncError::ProcessTerminated),
                retry_err: last_retryable,
                fatal_err: Some(BackupError::Cancelled),
            };
        }

        match spawn_and_wait(binary, &args, password, cancel, &mut stdout_sink) {
            Ok(result) => {
                return RetryOutcome {
                    result: Some(result),
                    session_err: None,
                    retry_err: last_retryable,
                    fatal_err: None,
                };
            }
            Err(RsyncError::ProcessTerminated) => {
                return RetryOutcome {
                    result: None,
                    session_err: Some(RsyncError::ProcessTerminated),
                    retry_err: last_retryable,
                    fatal_err: Some(BackupError::Cancelled),
                };
            }
            Err(err) => {
                last_retryable = Some(err.clone());

                if let Some(cb) = on_error {
                    let decision = cb(&err, paths, predicted_size, repeat_idx, retries_left);
                    if let Some(fatal) = decision.fatal {
                        return RetryOutcome {
                            result: None,
                            session_err: Some(err),
                            retry_err: last_retryable,
                            fatal_err: Some(fatal),
                        };
                    }
                    retries_left = decision.retries_left;
                }

                if retries_left == 0 {
                    return RetryOutcome {
                        result: None,
                        session_err: Some(err),
                        retry_err: last_retryable,
                        fatal_err: None,
                    };
                }

                retries_left -= 1;
                repeat_idx += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_args_prepends_default_flags() {
        let args = build_args(&["--recursive".to_string()], "src", "dst");
        assert_eq!(
            args,
            vec![
                "--progress".to_string(),
                "--verbose".to_string(),
                "--recursive".to_string(),
                "src".to_string(),
                "dst".to_string(),
            ]
        );
    }

    #[test]
    fn cancellation_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancellation_token_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    fn test_paths() -> NodePaths {
        NodePaths { source: "src".to_string(), dest: "dst".to_string() }
    }

    #[test]
    fn run_with_retry_fails_fast_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_with_retry(
            "rsync",
            &[],
            "src",
            "dst",
            2,
            None,
            &cancel,
            &test_paths(),
            0,
            None,
            |_line| {},
        );
        assert_eq!(outcome.session_err, Some(RsyncError::ProcessTerminated));
        assert!(outcome.fatal_err.is_some());
    }

    #[test]
    fn run_with_retry_against_missing_binary_exhausts_retries_without_callback() {
        let cancel = CancellationToken::new();
        let outcome = run_with_retry(
            "definitely-not-a-real-binary-xyz",
            &[],
            "src",
            "dst",
            1,
            None,
            &cancel,
            &test_paths(),
            0,
            None,
            |_line| {},
        );
        assert!(outcome.result.is_none());
        assert_eq!(outcome.session_err, Some(RsyncError::RsyncNotFound));
    }

    #[test]
    fn on_error_callback_receives_paths_and_predicted_size() {
        let cancel = CancellationToken::new();
        let paths = test_paths();
        let seen_predicted = Mutex::new(None);
        let on_error: &OnError<'_> = &|_err, cb_paths, predicted, _repeat_idx, retries_left| {
            assert_eq!(cb_paths, &test_paths());
            *seen_predicted.lock().expect("lock poisoned") = Some(predicted);
            ErrorDecision { retries_left: 0, fatal: None }
        };

        let outcome = run_with_retry(
            "definitely-not-a-real-binary-xyz",
            &[],
            "src",
            "dst",
            1,
            None,
            &cancel,
            &paths,
            4_096,
            Some(on_error),
            |_line| {},
        );

        assert!(outcome.result.is_none());
        assert_eq!(*seen_predicted.lock().expect("lock poisoned"), Some(4_096));
    }
}
