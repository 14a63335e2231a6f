use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::file_system::FileSystem;

/// Result of scanning one log file for a literal pattern (typically a
/// password that slipped into a log line before a caller noticed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrubScanResult {
    pub file_path: String,
    pub match_count: usize,
}

/// Result of rewriting one log file with a pattern redacted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrubApplyResult {
    pub file_path: String,
    pub replacements: usize,
}

/// Redact every occurrence of `secret` in `text` with `*` characters of the
/// same length, so a scrubbed line still lines up visually with its
/// original. Used inline by the session driver before a command string or
/// source URL with an embedded password ever reaches a log line or a
/// `Notifier` event.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, &"*".repeat(secret.len()))
}

/// Scan every `*.log` file immediately under `log_dir` for occurrences of
/// `pattern`, returning one `ScrubScanResult` per file that contains at
/// least one match. A standalone utility an embedding application can run
/// against a session directory after the fact — not wired into
/// `SessionDriver` automatically.
pub fn scrub_scan(
    fs: &dyn FileSystem,
    log_dir: &Path,
    pattern: &str,
) -> Result<Vec<ScrubScanResult>, crate::error::BackupError> {
    if pattern.is_empty() {
        return Err(crate::error::BackupError::Config(
            "scrub pattern must not be empty".to_string(),
        ));
    }

    let mut results = Vec::new();
    for path in fs.read_dir(log_dir)? {
        if fs.is_dir(&path) || path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let content = fs.read_to_string(&path)?;
        let match_count = content.matches(pattern).count();
        if match_count > 0 {
            results.push(ScrubScanResult {
                file_path: path.display().to_string(),
                match_count,
            });
        }
    }
    results.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    Ok(results)
}

/// Rewrite each of `file_paths`, replacing every occurrence of `pattern`
/// with asterisks. Files that no longer exist are silently skipped.
pub fn scrub_apply(
    fs: &dyn FileSystem,
    pattern: &str,
    file_paths: &[String],
) -> Result<Vec<ScrubApplyResult>, crate::error::BackupError> {
    if pattern.is_empty() {
        return Err(crate::error::BackupError::Config(
            "scrub pattern must not be empty".to_string(),
        ));
    }

    let mut results = Vec::new();
    for file_path in file_paths {
        let path = Path::new(file_path);
        if !fs.exists(path) {
            continue;
        }
        let content = fs.read_to_string(path)?;
        let replacements = content.matches(pattern).count();
        if replacements > 0 {
            fs.write(path, &redact(&content, pattern))?;
        }
        results.push(ScrubApplyResult {
            file_path: file_path.clone(),
            replacements,
        });
    }
    Ok(results)
}
