use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the audit trail
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Directory holding `auditlogs-YYYYMMDD.log` and its backups
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Rotate the active file before it grows beyond this size (0 = never)
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Number of rotated backups to keep (0 = unlimited)
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Delete backups older than this many days (0 = keep forever)
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,

    /// Gzip rotated backups
    #[serde(default = "default_compress")]
    pub compress: bool,

    /// Partition days and stamp lines in UTC instead of local time
    #[serde(default)]
    pub utc: bool,
}

fn default_directory() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_max_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_backups() -> usize {
    7
}

fn default_max_age_days() -> u64 {
    7
}

fn default_compress() -> bool {
    true
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            max_size_bytes: default_max_size_bytes(),
            max_backups: default_max_backups(),
            max_age_days: default_max_age_days(),
            compress: default_compress(),
            utc: false,
        }
    }
}
