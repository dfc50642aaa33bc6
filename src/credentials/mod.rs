//! Encrypted credential records for external integrations.
//!
//! One durable record per provider (e.g. `"servicenow"`) holding the remote
//! instance location, OAuth client credentials, current tokens, and the
//! connection status. Client secrets and bearer tokens are sealed at rest
//! with AES-256-GCM; see [`encryption`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - one row per provider                  │
//! │  - column-targeted partial updates       │
//! │  - transparent token sealing             │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!       (seal)               (open)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SecretCipher (AES-256-GCM)         │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite (shared connection)         │
//! └─────────────────────────────────────────┘
//! ```

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod encryption;
mod storage;

pub use encryption::{SealedSecret, SecretCipher};
pub use storage::{CredentialStore, Database};

/// OAuth 2.0 grant type used by a provider integration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::ClientCredentials => "client_credentials",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            other => Err(anyhow!("Unknown grant type: {}", other)),
        }
    }
}

/// Connection status of a provider integration.
///
/// Stored explicitly as a tagged value rather than inferred from field
/// presence, so token possession alone never reads as "connected".
/// `Unconfigured` is the absence of a record and is never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Credentials saved, no tokens yet.
    Saved,
    /// Tokens acquired, activation pending an explicit connect.
    TokenAcquired,
    /// Explicitly activated by a connect action.
    Connected,
    /// Explicitly deactivated; configuration and tokens retained.
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Saved => "saved",
            ConnectionStatus::TokenAcquired => "token_acquired",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "saved" => Ok(ConnectionStatus::Saved),
            "token_acquired" => Ok(ConnectionStatus::TokenAcquired),
            "connected" => Ok(ConnectionStatus::Connected),
            "disconnected" => Ok(ConnectionStatus::Disconnected),
            other => Err(anyhow!("Unknown connection status: {}", other)),
        }
    }
}

/// A provider's credential record as read from the store.
///
/// Bearer tokens are opened (decrypted) transparently on read; the client
/// secret stays sealed and is opened on demand via
/// [`CredentialStore::open_client_secret`], so a corrupt secret surfaces
/// exactly where it is needed and never breaks status reads.
#[derive(Clone, Debug)]
pub struct ProviderCredential {
    pub provider: String,
    pub instance_url: String,
    pub client_id: String,
    pub client_secret: Option<SealedSecret>,
    pub grant_type: GrantType,
    pub redirect_uri: Option<String>,
    /// Single-use anti-CSRF token, present only while an authorization-code
    /// flow is in flight.
    pub oauth_state: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_test_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl ProviderCredential {
    pub fn connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn has_tokens(&self) -> bool {
        self.access_token.is_some()
    }

    /// Whether the access token must not be used without a refresh.
    /// A missing expiry means the token does not expire.
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.token_expiry {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }

    /// Whether an expired token can be replaced without user interaction.
    pub fn has_refresh_path(&self) -> bool {
        self.refresh_token.is_some() || self.grant_type == GrantType::ClientCredentials
    }
}

/// Fields accepted by a credential save. A `None` client secret preserves
/// whatever ciphertext is already stored.
#[derive(Clone, Debug)]
pub struct SaveCredentialFields {
    pub instance_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub grant_type: GrantType,
    pub redirect_uri: Option<String>,
}

/// Tokens issued by a provider's token endpoint, ready to persist.
#[derive(Clone, Debug)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}
