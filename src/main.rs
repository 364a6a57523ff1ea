use anyhow::Result;
use oauth_vault::config::{apply_env_overrides, load_config, VaultConfig};
use oauth_vault::credentials::RequestContext;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oauth_vault=info".into()),
        )
        .init();

    info!("oauth-vault starting...");

    // Config path: first argument, then VAULT_CONFIG, else defaults
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VAULT_CONFIG").ok());
    let mut config = match path {
        Some(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?
        }
        None => VaultConfig::default(),
    };
    apply_env_overrides(&mut config);

    // Fails here (non-zero exit) unless the degraded key policy is configured
    let vault = oauth_vault::bootstrap(&config).await?;

    let ctx = RequestContext::new().with_actor("bootstrap");
    let sample = vault.store.get_connections(&ctx, 0, 1)?;
    info!(
        has_connections = !sample.is_empty(),
        audit_failures = vault.store.audit_failures(),
        "Credential store reachable"
    );

    Ok(())
}
