use serde::{Deserialize, Serialize};

/// A three-way byte accumulator: bytes that completed, were skipped, or
/// failed. The invariant `total() == completed + skipped + failed` holds at
/// every point because the only mutator methods grow exactly one component.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ByteProgress {
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl ByteProgress {
    pub fn total(&self) -> u64 {
        self.completed + self.skipped + self.failed
    }

    pub fn add_completed(&mut self, bytes: u64) {
        self.completed += bytes;
    }

    pub fn add_skipped(&mut self, bytes: u64) {
        self.skipped += bytes;
    }

    pub fn add_failed(&mut self, bytes: u64) {
        self.failed += bytes;
    }

    pub fn merge(&mut self, other: ByteProgress) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Render a byte count the way `rsync -h`-style tools do: binary-prefixed,
/// one decimal place once we're past kibibytes.
pub fn human_readable_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit_idx = 0;
    while value >= 1024.0 && unit_idx < UNITS.len() - 1 {
        value /= 1024.0;
        unit_idx += 1;
    }
    format!("{:.1} {}", value, UNITS[unit_idx])
}

/// Parse the `total size is <N[,N]*>` line `rsync --dry-run` prints, tolerant
/// of thousands separators, returning the byte count.
pub fn parse_total_size_line(output: &str) -> Option<u64> {
    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix("total size is ") {
            let digits: String = rest
                .split(|c: char| !c.is_ascii_digit() && c != ',')
                .next()
                .unwrap_or("")
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() {
                return digits.parse().ok();
            }
        }
    }
    None
}

/// Round-to-nearest with ties going away from zero — MiB-to-byte conversions
/// and the planner's interpolated-depth rounding both need this, not banker's
/// rounding.
pub fn round_away_from_zero(value: f64) -> i64 {
    if value >= 0.0 {
        (value + 0.5).floor() as i64
    } else {
        (value - 0.5).ceil() as i64
    }
}

pub const MIB: u64 = 1024 * 1024;
