//! Encrypted registry of outgoing OAuth client credentials.
//!
//! Each [`OAuthOutgoingConnection`] describes one OAuth client this service
//! uses to obtain tokens from an external identity provider. The client
//! secret (and, for the password grant, the resource-owner password) is
//! sealed with AES-256-GCM before it reaches SQLite and stays sealed when
//! read back; [`CredentialStore::reveal_secret`] is the only way to get the
//! plaintext.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - CRUD operations                       │
//! │  - Seals secrets before every write      │
//! │  - One audit event per operation         │
//! └─────────────────────────────────────────┘
//!          ↓ (seal)            ↑ (explicit reveal)
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - AES-256-GCM, random nonce per secret  │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌──────────────────┐  ┌──────────────────┐
//! │ SQLite primary   │  │ SQLite replica   │
//! │ (writes)         │  │ (reads)          │
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use oauth_vault::audit::NoopAudit;
//! use oauth_vault::credentials::{CredentialStore, GrantType, OAuthOutgoingConnection, RequestContext};
//! use oauth_vault::keys::MasterKey;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = Arc::new(MasterKey::from_bytes(vec![0u8; 32]));
//! let store = CredentialStore::in_memory(key, Arc::new(NoopAudit))?;
//! let ctx = RequestContext::new();
//!
//! let saved = store.save_connection(&ctx, OAuthOutgoingConnection::new(
//!     "svc1",
//!     "abc",
//!     "s3cr3t",
//!     "https://idp.example/token",
//!     GrantType::ClientCredentials,
//!     vec!["aud1".to_string()],
//! ))?;
//!
//! let fetched = store.get_connection(&ctx, &saved.id)?;
//! let secrets = store.reveal_secret(&ctx, &fetched)?;
//! assert_eq!(secrets.client_secret, "s3cr3t");
//!
//! store.delete_connection(&ctx, &saved.id)?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub mod encryption;
mod storage;
mod validation;


pub use storage::CredentialStore;
pub use validation::validate;

/// OAuth grant types an outgoing connection may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    Password,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::Password => "password",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unsupported grant type '{0}'")]
pub struct UnsupportedGrantType(pub String);

impl FromStr for GrantType {
    type Err = UnsupportedGrantType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "password" => Ok(GrantType::Password),
            other => Err(UnsupportedGrantType(other.to_string())),
        }
    }
}

/// One outbound OAuth client configuration.
///
/// `client_secret` and `credentials_password` hold plaintext only on the
/// way into [`CredentialStore::save_connection`] /
/// [`CredentialStore::update_connection`]; every record the store returns
/// carries them sealed.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthOutgoingConnection {
    /// Empty until first save, then a server-assigned UUIDv7
    #[serde(default)]
    pub id: String,

    /// Who created the record (may be empty)
    #[serde(default)]
    pub creator_id: String,

    pub create_at: DateTime<Utc>,

    pub update_at: DateTime<Utc>,

    /// Display label
    pub name: String,

    pub client_id: String,

    pub client_secret: String,

    /// Resource-owner credentials, password grant only
    #[serde(default)]
    pub credentials_username: Option<String>,

    #[serde(default)]
    pub credentials_password: Option<String>,

    pub oauth_token_url: String,

    pub grant_type: GrantType,

    pub audiences: Vec<String>,
}

impl OAuthOutgoingConnection {
    /// Builds an unsaved record (empty id, timestamps set by the store).
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        oauth_token_url: impl Into<String>,
        grant_type: GrantType,
        audiences: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            creator_id: String::new(),
            create_at: now,
            update_at: now,
            name: name.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            credentials_username: None,
            credentials_password: None,
            oauth_token_url: oauth_token_url.into(),
            grant_type,
            audiences,
        }
    }

    /// Clears secret fields before a record leaves the service.
    pub fn sanitize(&mut self) {
        self.client_secret.clear();
        self.credentials_password = None;
    }
}

impl fmt::Debug for OAuthOutgoingConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthOutgoingConnection")
            .field("id", &self.id)
            .field("creator_id", &self.creator_id)
            .field("create_at", &self.create_at)
            .field("update_at", &self.update_at)
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("credentials_username", &self.credentials_username)
            .field(
                "credentials_password",
                &self.credentials_password.as_ref().map(|_| "<redacted>"),
            )
            .field("oauth_token_url", &self.oauth_token_url)
            .field("grant_type", &self.grant_type)
            .field("audiences", &self.audiences)
            .finish()
    }
}

/// Plaintext secrets of one connection, returned by an explicit reveal.
#[derive(Clone, PartialEq)]
pub struct RevealedSecrets {
    pub client_secret: String,
    pub credentials_password: Option<String>,
}

impl fmt::Debug for RevealedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RevealedSecrets(<redacted>)")
    }
}

/// Request-scoped context passed to every store operation.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub actor: Option<String>,
}

impl RequestContext {
    /// Context with a fresh request id and no actor.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            actor: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
