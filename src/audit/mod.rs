//! Append-only audit ledger for credential lifecycle actions.
//!
//! Every state-changing operation (save, oauth start, exchange, token
//! refresh, test, connect, disconnect) appends one entry keyed by provider
//! and actor, with a structured JSON detail payload. Entries are never
//! mutated or deleted; the type exposes `record` and `list` only.
//!
//! Detail payloads must never contain client secrets or full token values.

use crate::credentials::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

/// Audit action names. Failures use the `.failed` suffix convention.
pub mod actions {
    pub const CREDENTIALS_SAVED: &str = "credentials.saved";
    pub const OAUTH_STARTED: &str = "oauth.started";
    pub const OAUTH_EXCHANGED: &str = "oauth.exchanged";
    pub const OAUTH_EXCHANGE_FAILED: &str = "oauth.exchange.failed";
    pub const TOKEN_ACQUIRED: &str = "token.acquired";
    pub const TOKEN_ACQUIRE_FAILED: &str = "token.acquired.failed";
    pub const TOKEN_REFRESHED: &str = "token.refreshed";
    pub const TOKEN_REFRESH_FAILED: &str = "token.refresh.failed";
    pub const CONNECTED: &str = "connected";
    pub const CONNECT_FAILED: &str = "connect.failed";
    pub const DISCONNECTED: &str = "disconnected";
    pub const CONNECTION_TESTED: &str = "connection.tested";
    pub const CONNECTION_TEST_FAILED: &str = "connection.test.failed";
}

/// One immutable ledger entry.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub provider: String,
    pub action: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// Append-only ledger over the shared database.
pub struct AuditLog {
    db: Database,
}

impl AuditLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends one entry. `details` is stored as JSON text.
    pub fn record(
        &self,
        provider: &str,
        action: &str,
        actor: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        self.db
            .lock()
            .execute(
                "INSERT INTO audit_log (provider, action, actor, created_at, details)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    provider,
                    action,
                    actor,
                    Utc::now().to_rfc3339(),
                    details.to_string(),
                ],
            )
            .context("Failed to append audit entry")?;
        Ok(())
    }

    /// Most recent entries for a provider, newest first.
    pub fn list(&self, provider: &str, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, provider, action, actor, created_at, details
                 FROM audit_log
                 WHERE provider = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )
            .context("Failed to prepare audit query")?;

        let mut rows = stmt
            .query(params![provider, limit as i64])
            .context("Failed to execute audit query")?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().context("Failed to read audit row")? {
            let created_at: String = row.get(4)?;
            let details: String = row.get(5)?;
            entries.push(AuditEntry {
                id: row.get(0)?,
                provider: row.get(1)?,
                action: row.get(2)?,
                actor: row.get(3)?,
                timestamp: DateTime::parse_from_rfc3339(&created_at)
                    .context("Failed to parse audit timestamp")?
                    .with_timezone(&Utc),
                details: serde_json::from_str(&details)
                    .context("Failed to parse audit details")?,
            });
        }
        Ok(entries)
    }

    /// Number of entries recorded for a provider, optionally for one action.
    pub fn count(&self, provider: &str, action: Option<&str>) -> Result<usize> {
        let conn = self.db.lock();
        let count: i64 = match action {
            Some(action) => conn
                .query_row(
                    "SELECT COUNT(*) FROM audit_log WHERE provider = ?1 AND action = ?2",
                    params![provider, action],
                    |row| row.get(0),
                )
                .context("Failed to count audit entries")?,
            None => conn
                .query_row(
                    "SELECT COUNT(*) FROM audit_log WHERE provider = ?1",
                    params![provider],
                    |row| row.get(0),
                )
                .context("Failed to count audit entries")?,
        };
        Ok(count as usize)
    }
}
