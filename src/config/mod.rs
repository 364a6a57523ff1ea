pub mod env;
pub use env::apply_env_overrides;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// Re-export per-component config types
pub use crate::audit::config::AuditConfig;
pub use crate::keys::config::{KeyConfig, KeyFailurePolicy};

/// Complete vault configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub key: KeyConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Relational backend endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Primary SQLite database (all writes)
    #[serde(default = "default_primary")]
    pub primary: String,
    /// Read replica; reads go to the primary when unset
    #[serde(default)]
    pub replica: Option<String>,
}

fn default_primary() -> String {
    "oauth_vault.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            replica: None,
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<VaultConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: VaultConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
