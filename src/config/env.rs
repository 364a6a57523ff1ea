use super::{KeyFailurePolicy, VaultConfig};
use std::path::PathBuf;

/// Apply `VAULT_*` environment variables on top of a loaded config.
///
/// Unparseable values are ignored and the file/default value is kept.
pub fn apply_env_overrides(config: &mut VaultConfig) {
    apply_overrides_from(config, |name| std::env::var(name).ok());
}

fn apply_overrides_from<F>(config: &mut VaultConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("VAULT_DATABASE_PRIMARY") {
        config.database.primary = v;
    }
    if let Some(v) = lookup("VAULT_DATABASE_REPLICA") {
        config.database.replica = if v.is_empty() { None } else { Some(v) };
    }
    if let Some(v) = lookup("VAULT_AUDIT_DIRECTORY") {
        config.audit.directory = PathBuf::from(v);
    }
    if let Some(v) = lookup("VAULT_KEY_TIMEOUT_SECONDS") {
        if let Ok(n) = v.parse::<u64>() {
            config.key.timeout_seconds = n;
        }
    }
    if let Some(v) = lookup("VAULT_KEY_ON_FAILURE") {
        match v.as_str() {
            "abort" => config.key.on_failure = KeyFailurePolicy::Abort,
            "degraded" => config.key.on_failure = KeyFailurePolicy::Degraded,
            _ => {}
        }
    }
}
