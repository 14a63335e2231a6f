use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_retry_count() -> u32 {
    2
}

fn default_previous_backups_count() -> u32 {
    1
}

/// One logical unit of backup: a remote `rsync://` source paired with the
/// local subpath it lands under inside a session directory.
///
/// `password`, if present, is carried only in memory and through the
/// `RSYNC_PASSWORD` environment variable handed to the child process — it is
/// never included in `Debug`/log output.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceModule {
    pub source_url: String,
    pub dest_subpath: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for SourceModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceModule")
            .field("source_url", &self.source_url)
            .field("dest_subpath", &self.dest_subpath)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SourceModule {
    pub fn new(source_url: impl Into<String>, dest_subpath: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            dest_subpath: dest_subpath.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// The boolean transfer-flag set the session driver mixes into every `rsync`
/// invocation alongside the per-node flags mandated by the backup type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferFlags {
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub group: bool,
    #[serde(default)]
    pub perms: bool,
    #[serde(default)]
    pub symlinks: bool,
    #[serde(default)]
    pub devices: bool,
    #[serde(default)]
    pub specials: bool,
}

/// The typed shape an embedding application hands this crate after loading
/// its own declarative configuration file — config *loading* is an external
/// collaborator's job; this struct is the contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub marker_file_name: String,

    #[serde(default = "default_retry_count")]
    pub rsync_retry_count: u32,

    #[serde(default = "default_true")]
    pub auto_block_size: bool,

    /// Only consulted when `auto_block_size` is false.
    #[serde(default)]
    pub max_block_size_mib: Option<u64>,

    #[serde(default = "default_true")]
    pub use_previous_backups: bool,

    #[serde(default = "default_previous_backups_count")]
    pub previous_backups_count: u32,

    #[serde(default)]
    pub enable_rsync_log: bool,

    #[serde(default)]
    pub enable_intensive_rsync_log: bool,

    #[serde(default)]
    pub transfer_flags: TransferFlags,
}

/// Hard cap `rsync --link-dest` imposes: at most this many `--link-dest=`
/// flags may be passed to a single invocation.
pub const LINK_DEST_HARD_CAP: u32 = 20;

/// Default block size bound, expressed in MiB, as a floor/ceiling pair.
pub const AUTO_BLOCK_SIZE_FLOOR_MIB: u64 = 300;
pub const AUTO_BLOCK_SIZE_CEIL_MIB: u64 = 5000;
/// Target number of `rsync` invocations per source when auto-sizing blocks.
pub const AUTO_BLOCK_SIZE_TARGET_CALLS: u64 = 50;

impl SessionConfig {
    /// Retry count clamped to the 0..=5 range the process runner honors.
    pub fn clamped_retry_count(&self) -> u32 {
        self.rsync_retry_count.min(5)
    }

    /// Previous-backups-to-consider count clamped to the `rsync --link-dest`
    /// hard cap of 20.
    pub fn clamped_previous_backups_count(&self) -> u32 {
        self.previous_backups_count.min(LINK_DEST_HARD_CAP)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            marker_file_name: ".nobackup".to_string(),
            rsync_retry_count: default_retry_count(),
            auto_block_size: true,
            max_block_size_mib: None,
            use_previous_backups: true,
            previous_backups_count: default_previous_backups_count(),
            enable_rsync_log: false,
            enable_intensive_rsync_log: false,
            transfer_flags: TransferFlags::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_count_clamps_above_five() {
        let mut cfg = SessionConfig::default();
        cfg.rsync_retry_count = 11;
        assert_eq!(cfg.clamped_retry_count(), 5);
    }

    #[test]
    fn previous_backups_count_clamps_above_twenty() {
        let mut cfg = SessionConfig::default();
        cfg.previous_backups_count = 99;
        assert_eq!(cfg.clamped_previous_backups_count(), 20);
    }

    #[test]
    fn source_module_debug_redacts_password() {
        let m = SourceModule::new("rsync://host/mod", "sub").with_password("hunter2");
        let rendered = format!("{:?}", m);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn session_config_deserializes_with_defaults() {
        let json = r#"{"marker_file_name": ".nobackup"}"#;
        let cfg: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.rsync_retry_count, 2);
        assert!(cfg.auto_block_size);
        assert_eq!(cfg.previous_backups_count, 1);
    }
}
