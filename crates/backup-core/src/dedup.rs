use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LINK_DEST_HARD_CAP;
use crate::error::BackupError;
use crate::file_system::{FileSystem, FsError};

/// File name a completed session writes at its root, self-describing and
/// immutable once written.
pub const SIGNATURES_FILE_NAME: &str = "~backup_nodes~.signatures";

/// One source's entry inside a session's signature file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub source_id_cipher: String,
    pub dest_subpath: String,
}

#[derive(Serialize, Deserialize)]
struct NodeSignatures {
    signatures: Vec<SignatureEntry>,
}

/// Encode entries as a single self-describing line: JSON wrapped in
/// (URL-safe, unpadded) Base64, chosen because it round-trips trivially and
/// the crate already pulls in both `serde_json` and `base64`.
pub fn encode_signatures(entries: &[SignatureEntry]) -> Result<String, BackupError> {
    let doc = NodeSignatures { signatures: entries.to_vec() };
    let json = serde_json::to_string(&doc).map_err(|e| BackupError::Signature(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Inverse of `encode_signatures`. `encode_signatures` composed with this is
/// the identity on the entry list.
pub fn decode_signatures(data: &str) -> Result<Vec<SignatureEntry>, BackupError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim())
        .map_err(|e| BackupError::Signature(e.to_string()))?;
    let doc: NodeSignatures =
        serde_json::from_slice(&bytes).map_err(|e| BackupError::Signature(e.to_string()))?;
    Ok(doc.signatures)
}

/// Write the signature file for a just-completed session. Called once, at
/// the end of a successful session, after the directory has been renamed
/// from its `(incomplete)` form.
pub fn write_signature_file(
    fs: &dyn FileSystem,
    session_dir: &Path,
    entries: &[SignatureEntry],
) -> Result<(), BackupError> {
    let encoded = encode_signatures(entries)?;
    fs.write(&session_dir.join(SIGNATURES_FILE_NAME), &encoded)?;
    Ok(())
}

/// A previously-backed-up source discovered under the destination root,
/// eligible as an `rsync --link-dest` donor for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrevBackup {
    pub signature_file_path: PathBuf,
    pub source_id_cipher: String,
    pub dest_subpath: String,
    pub modified_time: DateTime<Utc>,
}

impl PrevBackup {
    /// `dirname(signatureFilePath)/destSubPath`, per the data model.
    pub fn backup_dir(&self) -> PathBuf {
        self.signature_file_path
            .parent()
            .map(|p| p.join(&self.dest_subpath))
            .unwrap_or_else(|| PathBuf::from(&self.dest_subpath))
    }
}

/// Scan immediate subdirectories of `dest_root` for readable signature
/// files, keeping only signatures whose source ID is in
/// `current_source_ids`. Matches are grouped by source ID and ranked most
/// recent (by the signature file's modification time) first, capped at
/// `min(configured_last_n, 20)` — the `rsync --link-dest` hard limit.
///
/// A missing or permission-denied signature file in a candidate
/// subdirectory is logged and the subdirectory skipped, not treated as a
/// fatal error; any other I/O error propagates.
pub fn discover_previous_backups(
    fs: &dyn FileSystem,
    dest_root: &Path,
    current_source_ids: &[String],
    configured_last_n: u32,
) -> Result<HashMap<String, Vec<PrevBackup>>, BackupError> {
    let cap = configured_last_n.min(LINK_DEST_HARD_CAP) as usize;
    let mut matches: HashMap<String, Vec<PrevBackup>> = HashMap::new();

    let session_dirs = fs.read_dir(dest_root)?;
    for session_dir in session_dirs {
        if !fs.is_dir(&session_dir) {
            continue;
        }

        let sig_path = session_dir.join(SIGNATURES_FILE_NAME);
        let content = match fs.read_to_string(&sig_path) {
            Ok(content) => content,
            Err(FsError::NotFound(_)) => {
                log::debug!("no signature file under {}", session_dir.display());
                continue;
            }
            Err(FsError::PermissionDenied(_)) => {
                log::warn!("permission denied reading signature file under {}", session_dir.display());
                continue;
            }
            Err(other) => return Err(other.into()),
        };

        let modified = fs.modified_time(&sig_path)?;
        let signatures = decode_signatures(&content)?;

        for sig in signatures {
            if current_source_ids.iter().any(|id| id == &sig.source_id_cipher) {
                matches
                    .entry(sig.source_id_cipher.clone())
                    .or_default()
                    .push(PrevBackup {
                        signature_file_path: sig_path.clone(),
                        source_id_cipher: sig.source_id_cipher,
                        dest_subpath: sig.dest_subpath,
                        modified_time: modified,
                    });
            }
        }
    }

    for list in matches.values_mut() {
        list.sort_by(|a, b| b.modified_time.cmp(&a.modified_time));
        list.truncate(cap);
    }

    Ok(matches)
}
