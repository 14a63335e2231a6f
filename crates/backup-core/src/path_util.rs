use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Normalize an `rsync://[user@]host[:port]/module[/path]` URL for stable
/// hashing and display: trim whitespace, drop any `user@` component, collapse
/// repeated `/` in the path to one, and strip a trailing `/`.
///
/// Idempotent: `normalize_url(normalize_url(u)) == normalize_url(u)`.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();

    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("", trimmed),
    };

    let rest = match rest.split_once('@') {
        Some((_user, after)) => after,
        None => rest,
    };

    let collapsed = collapse_slashes(rest);
    let stripped = collapsed.strip_suffix('/').unwrap_or(&collapsed);

    if scheme.is_empty() {
        stripped.to_string()
    } else {
        format!("{}://{}", scheme, stripped)
    }
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_slash = false;
    for c in s.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

/// A URL-safe Base64 encoding of the SHA-256 digest of the normalized source
/// URL — the deduplication key used to match today's sources against
/// previous sessions' signature files.
///
/// Deterministic under normalization: `source_id(u) == source_id(normalize_url(u))`.
pub fn source_id(url: &str) -> String {
    let normalized = normalize_url(url);
    let digest = Sha256::digest(normalized.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Join a parent path and a child path segment, tolerating a missing or
/// doubled separator either side.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        return child.to_string();
    }
    let parent_trimmed = parent.trim_end_matches('/');
    let child_trimmed = child.trim_start_matches('/');
    if child_trimmed.is_empty() {
        parent_trimmed.to_string()
    } else {
        format!("{}/{}", parent_trimmed, child_trimmed)
    }
}

/// The last non-empty path segment of a (possibly trailing-slashed) path,
/// used as a directory node's `name`.
pub fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}
