//! Encrypted credential storage using SQLite.
//!
//! One row per provider. Secrets and bearer tokens are sealed with
//! AES-256-GCM before hitting disk. Every mutation is a column-targeted
//! UPDATE (partial-field merge), so concurrent writers for the same provider
//! cannot clobber unrelated fields.

use super::{
    encryption::{SealedSecret, SecretCipher},
    ConnectionStatus, GrantType, ProviderCredential, SaveCredentialFields, TokenGrant,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared SQLite handle for the credential and audit tables.
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - SQLite itself is thread-safe with serialized mode
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Creates or opens the database and ensures the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS provider_credentials (
                provider TEXT PRIMARY KEY,
                instance_url TEXT NOT NULL,
                client_id TEXT NOT NULL,
                client_secret TEXT,
                client_secret_nonce TEXT,
                grant_type TEXT NOT NULL,
                redirect_uri TEXT,
                oauth_state TEXT,
                access_token TEXT,
                access_token_nonce TEXT,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                token_expiry TEXT,
                status TEXT NOT NULL DEFAULT 'saved',
                connected_at TEXT,
                last_test_at TEXT,
                scope TEXT,
                token_type TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create provider_credentials table")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                action TEXT NOT NULL,
                actor TEXT NOT NULL,
                created_at TEXT NOT NULL,
                details TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create audit_log table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_provider ON audit_log(provider, id)",
            [],
        )
        .context("Failed to create audit index")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

/// Credential store: the exclusive owner of `provider_credentials` rows.
///
/// Other components (handshake engine, refresh guard) read records and
/// request updates through the targeted operations here; they never write
/// whole documents back.
pub struct CredentialStore {
    db: Database,
    cipher: SecretCipher,
}

impl CredentialStore {
    pub fn new(db: Database, cipher: SecretCipher) -> Self {
        Self { db, cipher }
    }

    /// Creates or merges the provider's record.
    ///
    /// A `None` client secret or redirect URI preserves the stored value.
    /// Token columns and status are never touched for an existing row; a
    /// new row starts in `saved`.
    pub fn upsert(&self, provider: &str, fields: &SaveCredentialFields) -> Result<()> {
        let sealed = match fields.client_secret.as_deref() {
            Some(secret) => Some(
                self.cipher
                    .seal(secret)
                    .context("Failed to encrypt client secret")?,
            ),
            None => None,
        };
        let (secret_ct, secret_nonce) = match &sealed {
            Some(s) => (Some(s.ciphertext.as_str()), Some(s.nonce.as_str())),
            None => (None, None),
        };

        let now = Utc::now().to_rfc3339();

        self.db
            .lock()
            .execute(
                r#"
                INSERT INTO provider_credentials (
                    provider, instance_url, client_id,
                    client_secret, client_secret_nonce,
                    grant_type, redirect_uri,
                    status, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'saved', ?8, ?8)
                ON CONFLICT(provider) DO UPDATE SET
                    instance_url = excluded.instance_url,
                    client_id = excluded.client_id,
                    client_secret = COALESCE(excluded.client_secret, client_secret),
                    client_secret_nonce = COALESCE(excluded.client_secret_nonce, client_secret_nonce),
                    grant_type = excluded.grant_type,
                    redirect_uri = COALESCE(excluded.redirect_uri, redirect_uri),
                    updated_at = excluded.updated_at
                "#,
                params![
                    provider,
                    fields.instance_url,
                    fields.client_id,
                    secret_ct,
                    secret_nonce,
                    fields.grant_type.as_str(),
                    fields.redirect_uri,
                    now,
                ],
            )
            .context("Failed to save credentials")?;

        Ok(())
    }

    /// Returns the provider's record, with bearer tokens opened and the
    /// client secret still sealed.
    pub fn get(&self, provider: &str) -> Result<Option<ProviderCredential>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT provider, instance_url, client_id,
                       client_secret, client_secret_nonce,
                       grant_type, redirect_uri, oauth_state,
                       access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce,
                       token_expiry, status, connected_at, last_test_at,
                       scope, token_type
                FROM provider_credentials
                WHERE provider = ?1
                "#,
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![provider])
            .context("Failed to execute query")?;

        match rows.next().context("Failed to read row")? {
            Some(row) => Ok(Some(self.row_to_credential(row)?)),
            None => Ok(None),
        }
    }

    /// Lists all provider records (tokens opened, secrets sealed).
    pub fn list(&self) -> Result<Vec<ProviderCredential>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT provider, instance_url, client_id,
                       client_secret, client_secret_nonce,
                       grant_type, redirect_uri, oauth_state,
                       access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce,
                       token_expiry, status, connected_at, last_test_at,
                       scope, token_type
                FROM provider_credentials
                ORDER BY provider
                "#,
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt.query([]).context("Failed to execute query")?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().context("Failed to read row")? {
            records.push(self.row_to_credential(row)?);
        }
        Ok(records)
    }

    /// Opens the record's sealed client secret.
    ///
    /// Returns `Ok(None)` when no secret has ever been saved. Decryption
    /// failure is an error; callers must not fall back to an empty secret.
    pub fn open_client_secret(&self, record: &ProviderCredential) -> Result<Option<String>> {
        match &record.client_secret {
            Some(sealed) => {
                let secret = self
                    .cipher
                    .open(sealed)
                    .context("Failed to decrypt client secret")?;
                Ok(Some(secret))
            }
            None => Ok(None),
        }
    }

    /// Persists a token grant: token columns, expiry, and scope metadata
    /// only. Clears the single-use OAuth state and promotes `saved` to
    /// `token_acquired`; a `connected`/`disconnected` status is untouched.
    pub fn update_tokens(&self, provider: &str, grant: &TokenGrant) -> Result<()> {
        let access = self
            .cipher
            .seal(&grant.access_token)
            .context("Failed to encrypt access token")?;
        let refresh = match grant.refresh_token.as_deref() {
            Some(token) => Some(
                self.cipher
                    .seal(token)
                    .context("Failed to encrypt refresh token")?,
            ),
            None => None,
        };
        let (refresh_ct, refresh_nonce) = match &refresh {
            Some(s) => (Some(s.ciphertext.as_str()), Some(s.nonce.as_str())),
            None => (None, None),
        };

        let affected = self
            .db
            .lock()
            .execute(
                r#"
                UPDATE provider_credentials SET
                    access_token = ?2,
                    access_token_nonce = ?3,
                    refresh_token = COALESCE(?4, refresh_token),
                    refresh_token_nonce = COALESCE(?5, refresh_token_nonce),
                    token_expiry = ?6,
                    scope = COALESCE(?7, scope),
                    token_type = COALESCE(?8, token_type),
                    oauth_state = NULL,
                    status = CASE WHEN status = 'saved' THEN 'token_acquired' ELSE status END,
                    updated_at = ?9
                WHERE provider = ?1
                "#,
                params![
                    provider,
                    access.ciphertext,
                    access.nonce,
                    refresh_ct,
                    refresh_nonce,
                    grant.expires_at.map(|dt| dt.to_rfc3339()),
                    grant.scope,
                    grant.token_type,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to store tokens")?;

        if affected == 0 {
            return Err(anyhow!("No credential record for provider '{}'", provider));
        }
        Ok(())
    }

    /// Explicit activation/deactivation, independent of token presence.
    pub fn set_connected(&self, provider: &str, connected: bool) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let affected = if connected {
            self.db.lock().execute(
                "UPDATE provider_credentials SET status = 'connected', connected_at = ?2, updated_at = ?2 WHERE provider = ?1",
                params![provider, now],
            )
        } else {
            self.db.lock().execute(
                "UPDATE provider_credentials SET status = 'disconnected', updated_at = ?2 WHERE provider = ?1",
                params![provider, now],
            )
        }
        .context("Failed to update connection status")?;

        Ok(affected > 0)
    }

    /// Sets or clears the in-flight anti-CSRF state token.
    pub fn set_oauth_state(&self, provider: &str, state: Option<&str>) -> Result<()> {
        let affected = self
            .db
            .lock()
            .execute(
                "UPDATE provider_credentials SET oauth_state = ?2, updated_at = ?3 WHERE provider = ?1",
                params![provider, state, Utc::now().to_rfc3339()],
            )
            .context("Failed to update OAuth state")?;

        if affected == 0 {
            return Err(anyhow!("No credential record for provider '{}'", provider));
        }
        Ok(())
    }

    /// Records a connectivity-test timestamp.
    pub fn touch_last_test(&self, provider: &str) -> Result<()> {
        self.db
            .lock()
            .execute(
                "UPDATE provider_credentials SET last_test_at = ?2, updated_at = ?2 WHERE provider = ?1",
                params![provider, Utc::now().to_rfc3339()],
            )
            .context("Failed to record test timestamp")?;
        Ok(())
    }

    fn row_to_credential(&self, row: &Row<'_>) -> Result<ProviderCredential> {
        let client_secret = sealed_from_columns(row.get(3)?, row.get(4)?);

        let access_token = match sealed_from_columns(row.get(8)?, row.get(9)?) {
            Some(sealed) => Some(
                self.cipher
                    .open(&sealed)
                    .context("Failed to decrypt access token")?,
            ),
            None => None,
        };
        let refresh_token = match sealed_from_columns(row.get(10)?, row.get(11)?) {
            Some(sealed) => Some(
                self.cipher
                    .open(&sealed)
                    .context("Failed to decrypt refresh token")?,
            ),
            None => None,
        };

        let grant_type: String = row.get(5)?;
        let status: String = row.get(13)?;

        Ok(ProviderCredential {
            provider: row.get(0)?,
            instance_url: row.get(1)?,
            client_id: row.get(2)?,
            client_secret,
            grant_type: GrantType::parse(&grant_type)?,
            redirect_uri: row.get(6)?,
            oauth_state: row.get(7)?,
            access_token,
            refresh_token,
            token_expiry: parse_timestamp(row.get(12)?)?,
            status: ConnectionStatus::parse(&status)?,
            connected_at: parse_timestamp(row.get(14)?)?,
            last_test_at: parse_timestamp(row.get(15)?)?,
            scope: row.get(16)?,
            token_type: row.get(17)?,
        })
    }
}

fn sealed_from_columns(ciphertext: Option<String>, nonce: Option<String>) -> Option<SealedSecret> {
    match (ciphertext, nonce) {
        (Some(ciphertext), Some(nonce)) => Some(SealedSecret { ciphertext, nonce }),
        _ => None,
    }
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .context("Failed to parse stored timestamp")
        })
        .transpose()
}
