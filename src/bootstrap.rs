//! Process bootstrap: key first, then audit trail, then the store.

use crate::audit::{AuditSink, AuditTrail};
use crate::config::VaultConfig;
use crate::credentials::CredentialStore;
use crate::keys::{bootstrap_key, MasterKey};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Fully initialized components, ready to serve requests.
pub struct Vault {
    pub key: Arc<MasterKey>,
    pub audit: Arc<AuditTrail>,
    pub store: CredentialStore,
}

/// Builds every component in dependency order.
///
/// The key is acquired (and the failure policy applied) before the store
/// exists, so no request can observe a partially initialized key.
pub async fn bootstrap(config: &VaultConfig) -> Result<Vault> {
    let key = bootstrap_key(&config.key)
        .await
        .context("Failed to acquire master key")?;
    if key.is_empty() {
        warn!("Master key is empty; running in degraded mode");
    }

    let audit = Arc::new(AuditTrail::new(config.audit.clone()).context("Failed to open audit trail")?);
    let sink: Arc<dyn AuditSink> = audit.clone();

    let store = CredentialStore::open(&config.database, Arc::clone(&key), sink)
        .context("Failed to open credential store")?;

    info!(
        primary = %config.database.primary,
        replica = config.database.replica.as_deref().unwrap_or("-"),
        audit_file = %audit.current_file().display(),
        "Vault ready"
    );

    Ok(Vault { key, audit, store })
}
