//! SQLite-backed store for outgoing OAuth connections.
//!
//! Secrets are sealed before every write and are never opened implicitly.
//! Each public operation emits exactly one audit event describing the
//! access or mutation (never the secret content).

use super::{
    encryption, validation, GrantType, OAuthOutgoingConnection, RequestContext, RevealedSecrets,
    UnsupportedGrantType,
};
use crate::audit::{AuditLevel, AuditSink};
use crate::config::DatabaseConfig;
use crate::error::{RegistryError, Result};
use crate::keys::MasterKey;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS oauth_outgoing_connections (
        id                   TEXT PRIMARY KEY,
        creator_id           TEXT NOT NULL,
        create_at            TEXT NOT NULL,
        update_at            TEXT NOT NULL,
        name                 TEXT NOT NULL,
        client_id            TEXT NOT NULL,
        client_secret        TEXT NOT NULL,
        credentials_username TEXT,
        credentials_password TEXT,
        oauth_token_url      TEXT NOT NULL,
        grant_type           TEXT NOT NULL,
        audiences            TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_oauth_outgoing_create_at
        ON oauth_outgoing_connections(create_at, id);
"#;

const SELECT_COLUMNS: &str = "SELECT id, creator_id, create_at, update_at, name, client_id, \
     client_secret, credentials_username, credentials_password, oauth_token_url, grant_type, \
     audiences FROM oauth_outgoing_connections";

/// Encrypted store of outgoing OAuth connections.
///
/// # Schema
/// ```sql
/// CREATE TABLE oauth_outgoing_connections (
///     id                   TEXT PRIMARY KEY,   -- UUIDv7
///     creator_id           TEXT NOT NULL,
///     create_at            TEXT NOT NULL,      -- RFC 3339, fixed width
///     update_at            TEXT NOT NULL,
///     name                 TEXT NOT NULL,
///     client_id            TEXT NOT NULL,
///     client_secret        TEXT NOT NULL,      -- Sealed
///     credentials_username TEXT,
///     credentials_password TEXT,               -- Sealed (optional)
///     oauth_token_url      TEXT NOT NULL,
///     grant_type           TEXT NOT NULL,
///     audiences            TEXT NOT NULL       -- JSON array
/// );
/// ```
///
/// # Thread Safety
/// - Each connection is wrapped in a Mutex
/// - Writes use the primary connection, reads the replica when configured
/// - Row-level consistency is left to SQLite
pub struct CredentialStore {
    primary: Mutex<Connection>,
    replica: Option<Mutex<Connection>>,
    key: Arc<MasterKey>,
    audit: Arc<dyn AuditSink>,
    audit_failures: AtomicU64,
}

impl CredentialStore {
    /// Opens the primary database and ensures the schema.
    ///
    /// The optional replica is opened read-only and must already carry the
    /// table; a missing or unreplicated replica is a `Persistence` error.
    pub fn open(
        config: &DatabaseConfig,
        key: Arc<MasterKey>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let primary = Connection::open(&config.primary)
            .map_err(RegistryError::persistence("open primary database"))?;
        Self::create_schema(&primary)?;

        // The replica is fed by the primary, never written here
        let replica = match &config.replica {
            Some(path) => {
                let replica = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                    .map_err(RegistryError::persistence("open replica database"))?;
                replica
                    .prepare("SELECT id FROM oauth_outgoing_connections LIMIT 1")
                    .map_err(RegistryError::persistence("check replica schema"))?;
                Some(replica)
            }
            None => None,
        };

        Ok(Self::from_connections(primary, replica, key, audit))
    }

    /// Store backed by a private in-memory database (no replica).
    pub fn in_memory(key: Arc<MasterKey>, audit: Arc<dyn AuditSink>) -> Result<Self> {
        let primary = Connection::open_in_memory()
            .map_err(RegistryError::persistence("open in-memory database"))?;
        Self::create_schema(&primary)?;
        Ok(Self::from_connections(primary, None, key, audit))
    }

    fn create_schema(primary: &Connection) -> Result<()> {
        primary
            .execute_batch(SCHEMA)
            .map_err(RegistryError::persistence("create oauth outgoing connection table"))
    }

    fn from_connections(
        primary: Connection,
        replica: Option<Connection>,
        key: Arc<MasterKey>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            primary: Mutex::new(primary),
            replica: replica.map(Mutex::new),
            key,
            audit,
            audit_failures: AtomicU64::new(0),
        }
    }

    /// Inserts a new connection.
    ///
    /// The record must not have an id yet; one is assigned here. Returns the
    /// stored record with secrets sealed.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, actor = ctx.actor.as_deref().unwrap_or("-")))]
    pub fn save_connection(
        &self,
        ctx: &RequestContext,
        conn: OAuthOutgoingConnection,
    ) -> Result<OAuthOutgoingConnection> {
        let requested = conn.id.clone();
        let result = self.insert(conn);
        match &result {
            Ok(saved) => {
                info!(id = %saved.id, "OAuth outgoing connection saved");
                self.emit(AuditLevel::Info, ctx, "save_connection", &saved.id, "ok");
            }
            Err(e) => self.emit_failure(ctx, "save_connection", &requested, e),
        }
        result
    }

    fn insert(&self, mut conn: OAuthOutgoingConnection) -> Result<OAuthOutgoingConnection> {
        if !conn.id.is_empty() {
            return Err(RegistryError::invalid(
                "id",
                format!("must be empty on save, got '{}'", conn.id),
            ));
        }

        // Stored with microsecond precision; keep the returned record identical
        let now = Utc::now().trunc_subsecs(6);
        conn.id = Uuid::now_v7().to_string();
        conn.create_at = now;
        conn.update_at = now;

        validation::validate(&conn)?;
        self.seal_secrets(&mut conn)?;

        let audiences = encode_audiences(&conn.audiences)?;

        // Plain INSERT: a colliding id is an error, never an overwrite
        lock(&self.primary)
            .execute(
                r#"
                INSERT INTO oauth_outgoing_connections (
                    id, creator_id, create_at, update_at,
                    name, client_id, client_secret,
                    credentials_username, credentials_password,
                    oauth_token_url, grant_type, audiences
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    conn.id,
                    conn.creator_id,
                    format_timestamp(&conn.create_at),
                    format_timestamp(&conn.update_at),
                    conn.name,
                    conn.client_id,
                    conn.client_secret,
                    conn.credentials_username,
                    conn.credentials_password,
                    conn.oauth_token_url,
                    conn.grant_type.as_str(),
                    audiences,
                ],
            )
            .map_err(RegistryError::persistence("save oauth outgoing connection"))?;

        Ok(conn)
    }

    /// Overwrites every mutable field of an existing connection.
    ///
    /// Secrets in `conn` must be plaintext; they are re-sealed. `id`,
    /// `creator_id` and `create_at` keep their stored values.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, actor = ctx.actor.as_deref().unwrap_or("-")))]
    pub fn update_connection(
        &self,
        ctx: &RequestContext,
        conn: OAuthOutgoingConnection,
    ) -> Result<OAuthOutgoingConnection> {
        let id = conn.id.clone();
        let result = self.overwrite(conn);
        match &result {
            Ok(updated) => {
                info!(id = %updated.id, "OAuth outgoing connection updated");
                self.emit(AuditLevel::Info, ctx, "update_connection", &updated.id, "ok");
            }
            Err(e) => self.emit_failure(ctx, "update_connection", &id, e),
        }
        result
    }

    fn overwrite(&self, mut conn: OAuthOutgoingConnection) -> Result<OAuthOutgoingConnection> {
        if conn.id.is_empty() {
            return Err(RegistryError::invalid("id", "must be set on update"));
        }

        conn.update_at = Utc::now().trunc_subsecs(6);

        validation::validate(&conn)?;
        self.seal_secrets(&mut conn)?;

        let audiences = encode_audiences(&conn.audiences)?;

        let stored = lock(&self.primary)
            .query_row(
                r#"
                UPDATE oauth_outgoing_connections SET
                    update_at = ?2,
                    name = ?3,
                    client_id = ?4,
                    client_secret = ?5,
                    credentials_username = ?6,
                    credentials_password = ?7,
                    oauth_token_url = ?8,
                    grant_type = ?9,
                    audiences = ?10
                WHERE id = ?1
                RETURNING creator_id, create_at
                "#,
                params![
                    conn.id,
                    format_timestamp(&conn.update_at),
                    conn.name,
                    conn.client_id,
                    conn.client_secret,
                    conn.credentials_username,
                    conn.credentials_password,
                    conn.oauth_token_url,
                    conn.grant_type.as_str(),
                    audiences,
                ],
                |row| Ok((row.get::<_, String>(0)?, timestamp_column(row, 1)?)),
            )
            .optional()
            .map_err(RegistryError::persistence("update oauth outgoing connection"))?;

        match stored {
            Some((creator_id, create_at)) => {
                conn.creator_id = creator_id;
                conn.create_at = create_at;
                Ok(conn)
            }
            None => Err(RegistryError::NotFound { id: conn.id }),
        }
    }

    /// Reads one connection; secrets stay sealed.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, actor = ctx.actor.as_deref().unwrap_or("-")))]
    pub fn get_connection(&self, ctx: &RequestContext, id: &str) -> Result<OAuthOutgoingConnection> {
        let result = self.fetch(id);
        match &result {
            Ok(_) => {
                debug!(id = %id, "OAuth outgoing connection read");
                self.emit(AuditLevel::Info, ctx, "get_connection", id, "ok");
            }
            Err(e) => self.emit_failure(ctx, "get_connection", id, e),
        }
        result
    }

    fn fetch(&self, id: &str) -> Result<OAuthOutgoingConnection> {
        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
        lock(self.reader())
            .query_row(&sql, params![id], row_to_connection)
            .optional()
            .map_err(RegistryError::persistence("get oauth outgoing connection"))?
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// Returns one page of connections in creation order.
    ///
    /// Never more than `limit` records; an out-of-range page is empty.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, actor = ctx.actor.as_deref().unwrap_or("-"), offset = offset, limit = limit))]
    pub fn get_connections(
        &self,
        ctx: &RequestContext,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<OAuthOutgoingConnection>> {
        let result = self.page(offset, limit);
        match &result {
            Ok(conns) => {
                debug!(returned = conns.len(), "OAuth outgoing connections listed");
                self.emit(
                    AuditLevel::Info,
                    ctx,
                    "get_connections",
                    "-",
                    &format!("ok offset={} limit={} count={}", offset, limit, conns.len()),
                );
            }
            Err(e) => self.emit_failure(ctx, "get_connections", "-", e),
        }
        result
    }

    fn page(&self, offset: usize, limit: usize) -> Result<Vec<OAuthOutgoingConnection>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let sql = format!("{} ORDER BY create_at ASC, id ASC LIMIT ?1 OFFSET ?2", SELECT_COLUMNS);
        let conn = lock(self.reader());
        let mut stmt = conn
            .prepare(&sql)
            .map_err(RegistryError::persistence("prepare oauth outgoing connection listing"))?;

        let conns = stmt
            .query_map(params![limit, offset], row_to_connection)
            .map_err(RegistryError::persistence("list oauth outgoing connections"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(RegistryError::persistence("read oauth outgoing connections"))?;

        Ok(conns)
    }

    /// Deletes a connection.
    ///
    /// Idempotent: deleting an id that does not exist succeeds, so a retried
    /// delete never reports a spurious failure. Callers that need to know
    /// whether the row existed should call [`Self::get_connection`] first.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, actor = ctx.actor.as_deref().unwrap_or("-")))]
    pub fn delete_connection(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        let result = lock(&self.primary)
            .execute(
                "DELETE FROM oauth_outgoing_connections WHERE id = ?1",
                params![id],
            )
            .map_err(RegistryError::persistence("delete oauth outgoing connection"));

        match result {
            Ok(removed) => {
                info!(id = %id, removed, "OAuth outgoing connection deleted");
                self.emit(
                    AuditLevel::Info,
                    ctx,
                    "delete_connection",
                    id,
                    &format!("ok removed={}", removed > 0),
                );
                Ok(())
            }
            Err(e) => {
                self.emit_failure(ctx, "delete_connection", id, &e);
                Err(e)
            }
        }
    }

    /// Opens the sealed secrets of a record returned by this store.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, actor = ctx.actor.as_deref().unwrap_or("-")))]
    pub fn reveal_secret(
        &self,
        ctx: &RequestContext,
        conn: &OAuthOutgoingConnection,
    ) -> Result<RevealedSecrets> {
        let result = self.open_secrets(conn);
        match &result {
            Ok(_) => self.emit(AuditLevel::Info, ctx, "reveal_secret", &conn.id, "ok"),
            Err(e) => self.emit_failure(ctx, "reveal_secret", &conn.id, e),
        }
        result
    }

    fn open_secrets(&self, conn: &OAuthOutgoingConnection) -> Result<RevealedSecrets> {
        let client_secret = encryption::open(&conn.client_secret, &self.key)?;
        let credentials_password = conn
            .credentials_password
            .as_deref()
            .map(|sealed| encryption::open(sealed, &self.key))
            .transpose()?;

        Ok(RevealedSecrets {
            client_secret,
            credentials_password,
        })
    }

    /// Number of audit events that could not be written.
    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    fn seal_secrets(&self, conn: &mut OAuthOutgoingConnection) -> Result<()> {
        conn.client_secret = encryption::seal(&conn.client_secret, &self.key)?;
        if let Some(password) = conn.credentials_password.as_deref() {
            conn.credentials_password = Some(encryption::seal(password, &self.key)?);
        }
        Ok(())
    }

    fn reader(&self) -> &Mutex<Connection> {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    fn emit_failure(&self, ctx: &RequestContext, operation: &str, target: &str, err: &RegistryError) {
        self.emit(AuditLevel::Error, ctx, operation, target, &format!("error: {}", err));
    }

    /// Audit writes are best effort: a failure is logged and counted but
    /// never changes the outcome of the credential operation.
    fn emit(&self, level: AuditLevel, ctx: &RequestContext, operation: &str, target: &str, outcome: &str) {
        let message = format!(
            "{} id={} request_id={} actor={} result={}",
            operation,
            audit_value(target),
            audit_value(&ctx.request_id),
            audit_value(ctx.actor.as_deref().unwrap_or("-")),
            outcome
        );

        if let Err(e) = self.audit.record(level, &message) {
            self.audit_failures.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, operation, request_id = %ctx.request_id, "Failed to write audit event");
        }
    }
}

/// Caller-supplied values are quoted unless they are a single plain token,
/// so they cannot forge extra `key=value` pairs.
fn audit_value(value: &str) -> Cow<'_, str> {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/' | '@' | '^' | '+'));
    if plain {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("{:?}", value))
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed width so lexical order matches time order
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_audiences(audiences: &[String]) -> Result<String> {
    serde_json::to_string(audiences)
        .map_err(|e| RegistryError::invalid("audiences", format!("cannot encode: {}", e)))
}

fn conversion_error<E>(idx: usize) -> impl FnOnce(E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(conversion_error::<chrono::ParseError>(idx))
}

fn row_to_connection(row: &Row<'_>) -> rusqlite::Result<OAuthOutgoingConnection> {
    let grant_type: String = row.get(10)?;
    let audiences: String = row.get(11)?;

    Ok(OAuthOutgoingConnection {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        create_at: timestamp_column(row, 2)?,
        update_at: timestamp_column(row, 3)?,
        name: row.get(4)?,
        client_id: row.get(5)?,
        client_secret: row.get(6)?,
        credentials_username: row.get(7)?,
        credentials_password: row.get(8)?,
        oauth_token_url: row.get(9)?,
        grant_type: grant_type
            .parse::<GrantType>()
            .map_err(conversion_error::<UnsupportedGrantType>(10))?,
        audiences: serde_json::from_str(&audiences)
            .map_err(conversion_error::<serde_json::Error>(11))?,
    })
}
