//! Integration lifecycle manager.
//!
//! Orchestrates the credential store, cipher, audit ledger, handshake
//! engine, and refresh guard behind the boundary operations the HTTP
//! handlers call. Constructed once at startup and injected by reference;
//! no module-level state.
//!
//! State machine:
//!
//! ```text
//! Unconfigured → Saved → TokenAcquired → Connected ⇄ Disconnected
//!                  ↑          (tokens alone never activate;
//!              re-save         connect is an explicit action)
//! ```

use crate::audit::{actions, AuditLog};
use crate::credentials::{
    CredentialStore, GrantType, ProviderCredential, SaveCredentialFields,
};
use crate::error::LifecycleError;
use crate::oauth::{handshake, provider, TokenRefreshGuard};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Tuning for the manager's outbound HTTP behavior and validation.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Relax the HTTPS/domain-suffix instance check (dev/test only).
    pub allow_insecure_instances: bool,
    /// Bound on every outbound call to a provider.
    pub http_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            allow_insecure_instances: false,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a credential save.
#[derive(Clone, Debug, Serialize)]
pub struct SaveOutcome {
    /// True when a new secret was stored for a provider that already held
    /// tokens: those tokens were minted against the old secret, so
    /// re-authorization is likely required.
    pub reauth_likely: bool,
}

/// Result of a connectivity test.
#[derive(Clone, Debug, Serialize)]
pub struct TestOutcome {
    pub message: String,
    pub data: serde_json::Value,
}

/// Externally visible integration state. Never carries the secret or raw
/// token values.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationState {
    pub provider: String,
    pub instance: String,
    pub client_id: String,
    pub grant_type: GrantType,
    pub status: crate::credentials::ConnectionStatus,
    pub connected: bool,
    pub has_tokens: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_test_at: Option<DateTime<Utc>>,
}

impl From<&ProviderCredential> for IntegrationState {
    fn from(rec: &ProviderCredential) -> Self {
        Self {
            provider: rec.provider.clone(),
            instance: rec.instance_url.clone(),
            client_id: rec.client_id.clone(),
            grant_type: rec.grant_type,
            status: rec.status,
            connected: rec.connected(),
            has_tokens: rec.has_tokens(),
            connected_at: rec.connected_at,
            last_test_at: rec.last_test_at,
        }
    }
}

pub struct IntegrationManager {
    store: Arc<CredentialStore>,
    audit: Arc<AuditLog>,
    http: reqwest::Client,
    guard: TokenRefreshGuard,
    allow_insecure_instances: bool,
}

impl IntegrationManager {
    pub fn new(
        store: Arc<CredentialStore>,
        audit: Arc<AuditLog>,
        config: ManagerConfig,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let guard = TokenRefreshGuard::new(Arc::clone(&store), Arc::clone(&audit), http.clone());

        Ok(Self {
            store,
            audit,
            http,
            guard,
            allow_insecure_instances: config.allow_insecure_instances,
        })
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Saves (upserts) a provider's credentials.
    ///
    /// Validates the instance URL against the provider's domain allow-list
    /// before anything is written; an invalid save never persists a record.
    /// Existing tokens and connection status are untouched.
    pub fn save_credentials(
        &self,
        provider_name: &str,
        actor: &str,
        fields: &SaveCredentialFields,
    ) -> Result<SaveOutcome, LifecycleError> {
        let profile = provider::get_provider_profile(provider_name).ok_or_else(|| {
            LifecycleError::Validation(format!("Unknown provider '{provider_name}'"))
        })?;

        profile.validate_instance_url(&fields.instance_url, self.allow_insecure_instances)?;

        if fields.client_id.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "clientId must not be empty".to_string(),
            ));
        }
        if let Some(secret) = &fields.client_secret {
            if secret.is_empty() {
                return Err(LifecycleError::Validation(
                    "clientSecret must not be empty".to_string(),
                ));
            }
        }

        let existing = self.store.get(provider_name)?;

        // The machine-to-machine grant cannot work without a secret on file
        if fields.grant_type == GrantType::ClientCredentials
            && fields.client_secret.is_none()
            && !existing
                .as_ref()
                .is_some_and(|rec| rec.client_secret.is_some())
        {
            return Err(LifecycleError::Validation(
                "clientSecret is required for the client_credentials grant".to_string(),
            ));
        }

        let secret_rotated = fields.client_secret.is_some();
        let reauth_likely =
            secret_rotated && existing.as_ref().is_some_and(|rec| rec.has_tokens());

        self.store.upsert(provider_name, fields)?;

        self.audit.record(
            provider_name,
            actions::CREDENTIALS_SAVED,
            actor,
            json!({
                "grant_type": fields.grant_type.as_str(),
                "secret_rotated": secret_rotated,
                "reauth_likely": reauth_likely,
            }),
        )?;
        info!(provider = %provider_name, grant_type = %fields.grant_type.as_str(), "Credentials saved");

        Ok(SaveOutcome { reauth_likely })
    }

    /// Begins an authorization-code flow: generates a single-use CSRF state,
    /// persists it on the record, and returns the authorization URL.
    pub fn start_oauth(&self, provider_name: &str, actor: &str) -> Result<String, LifecycleError> {
        let record = self.require_record(provider_name)?;
        let profile = self.require_profile(provider_name)?;

        let redirect_uri = record.redirect_uri.as_deref().ok_or_else(|| {
            LifecycleError::NotConfigured(
                "No redirect URI saved; save credentials with redirectUri first".to_string(),
            )
        })?;

        let state = Uuid::new_v4().to_string();
        self.store.set_oauth_state(provider_name, Some(&state))?;

        let url = profile.authorize_url(&record.instance_url, &record.client_id, redirect_uri, &state);

        self.audit
            .record(provider_name, actions::OAUTH_STARTED, actor, json!({}))?;
        info!(provider = %provider_name, "OAuth authorization started");

        Ok(url)
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// Validates the anti-CSRF state before the secret is touched or any
    /// network call is made. Acquires tokens only; activation stays a
    /// separate explicit connect.
    pub async fn exchange_code(
        &self,
        provider_name: &str,
        actor: &str,
        code: &str,
        state: Option<&str>,
    ) -> Result<(), LifecycleError> {
        let record = self.require_record(provider_name)?;
        let profile = self.require_profile(provider_name)?;

        // A stored state must match exactly; the check is skipped only when
        // no state is on file (flows that never called start).
        if let Some(stored) = &record.oauth_state {
            if state != Some(stored.as_str()) {
                warn!(provider = %provider_name, "OAuth state mismatch on callback (possible CSRF)");
                let err = LifecycleError::CsrfValidation;
                self.audit.record(
                    provider_name,
                    actions::OAUTH_EXCHANGE_FAILED,
                    actor,
                    json!({ "error": err.audit_message() }),
                )?;
                return Err(err);
            }
        }

        let secret = match self.open_secret(&record) {
            Ok(secret) => secret,
            Err(err) => {
                self.audit.record(
                    provider_name,
                    actions::OAUTH_EXCHANGE_FAILED,
                    actor,
                    json!({ "error": err.audit_message() }),
                )?;
                return Err(err);
            }
        };
        let redirect_uri = record.redirect_uri.clone().unwrap_or_default();

        match handshake::exchange_authorization_code(
            &self.http,
            &profile.token_url(&record.instance_url),
            code,
            &redirect_uri,
            &record.client_id,
            &secret,
        )
        .await
        {
            Ok(grant) => {
                // Persisting the grant also clears the single-use state
                self.store.update_tokens(provider_name, &grant)?;
                self.audit.record(
                    provider_name,
                    actions::OAUTH_EXCHANGED,
                    actor,
                    json!({
                        "scope": grant.scope,
                        "token_type": grant.token_type,
                        "expires_at": grant.expires_at.map(|dt| dt.to_rfc3339()),
                    }),
                )?;
                info!(provider = %provider_name, "Authorization code exchanged for tokens");
                Ok(())
            }
            Err(err) => {
                warn!(provider = %provider_name, error = %err, "Token exchange failed");
                self.audit.record(
                    provider_name,
                    actions::OAUTH_EXCHANGE_FAILED,
                    actor,
                    json!({ "error": err.audit_message() }),
                )?;
                Err(err)
            }
        }
    }

    /// Issues tokens via the client-credentials grant.
    pub async fn acquire_client_credentials_token(
        &self,
        provider_name: &str,
        actor: &str,
    ) -> Result<(), LifecycleError> {
        let record = self.require_record(provider_name)?;
        let profile = self.require_profile(provider_name)?;

        let secret = match self.open_secret(&record) {
            Ok(secret) => secret,
            Err(err) => {
                self.audit.record(
                    provider_name,
                    actions::TOKEN_ACQUIRE_FAILED,
                    actor,
                    json!({ "error": err.audit_message() }),
                )?;
                return Err(err);
            }
        };

        match handshake::acquire_client_credentials(
            &self.http,
            &profile.token_url(&record.instance_url),
            &record.client_id,
            &secret,
        )
        .await
        {
            Ok(grant) => {
                self.store.update_tokens(provider_name, &grant)?;
                self.audit.record(
                    provider_name,
                    actions::TOKEN_ACQUIRED,
                    actor,
                    json!({
                        "scope": grant.scope,
                        "expires_at": grant.expires_at.map(|dt| dt.to_rfc3339()),
                    }),
                )?;
                info!(provider = %provider_name, "Client-credentials token acquired");
                Ok(())
            }
            Err(err) => {
                warn!(provider = %provider_name, error = %err, "Client-credentials acquisition failed");
                self.audit.record(
                    provider_name,
                    actions::TOKEN_ACQUIRE_FAILED,
                    actor,
                    json!({ "error": err.audit_message() }),
                )?;
                Err(err)
            }
        }
    }

    /// Explicit activation. Token possession alone never connects an
    /// integration; this is the deliberate human gate.
    pub fn connect(&self, provider_name: &str, actor: &str) -> Result<(), LifecycleError> {
        let record = self.require_record(provider_name)?;

        let usable = record.has_tokens()
            && (!record.token_expired(Utc::now()) || record.has_refresh_path());
        if !usable {
            let err = LifecycleError::TokensMissing;
            self.audit.record(
                provider_name,
                actions::CONNECT_FAILED,
                actor,
                json!({ "error": err.audit_message() }),
            )?;
            return Err(err);
        }

        self.store.set_connected(provider_name, true)?;
        self.audit
            .record(provider_name, actions::CONNECTED, actor, json!({}))?;
        info!(provider = %provider_name, "Integration connected");
        Ok(())
    }

    /// Explicit deactivation. Flips the status only; configuration and
    /// tokens are retained (tokens stay sealed at rest) so a later connect
    /// does not force a full re-authorization.
    pub fn disconnect(&self, provider_name: &str, actor: &str) -> Result<(), LifecycleError> {
        if self.store.set_connected(provider_name, false)? {
            self.audit.record(
                provider_name,
                actions::DISCONNECTED,
                actor,
                json!({ "tokens_retained": true }),
            )?;
            info!(provider = %provider_name, "Integration disconnected");
        }
        Ok(())
    }

    /// Runs an authenticated probe against the provider instance,
    /// refreshing the token first if needed.
    pub async fn test_connection(
        &self,
        provider_name: &str,
        actor: &str,
    ) -> Result<TestOutcome, LifecycleError> {
        let token = match self.guard.ensure_fresh(provider_name).await {
            Ok(token) => token,
            Err(err) => {
                self.audit.record(
                    provider_name,
                    actions::CONNECTION_TEST_FAILED,
                    actor,
                    json!({ "error": err.audit_message() }),
                )?;
                return Err(err);
            }
        };

        // Record re-fetched after the await: the guard may have updated it
        let record = self.require_record(provider_name)?;
        let profile = self.require_profile(provider_name)?;
        let probe_url = profile.probe_url(&record.instance_url);

        let response = self
            .http
            .get(&probe_url)
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| LifecycleError::TestFailed(format!("request failed: {e}")));

        let outcome = match response {
            Ok(response) if response.status().is_success() => {
                let data = response
                    .json::<serde_json::Value>()
                    .await
                    .unwrap_or(serde_json::Value::Null);
                Ok(TestOutcome {
                    message: format!("Reached {} successfully", record.instance_url),
                    data,
                })
            }
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<failed to read body>".to_string());
                Err(LifecycleError::TestFailed(format!(
                    "instance returned status {status}: {body}"
                )))
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(outcome) => {
                self.store.touch_last_test(provider_name)?;
                self.audit.record(
                    provider_name,
                    actions::CONNECTION_TESTED,
                    actor,
                    json!({}),
                )?;
                info!(provider = %provider_name, "Connection test succeeded");
                Ok(outcome)
            }
            Err(err) => {
                warn!(provider = %provider_name, error = %err, "Connection test failed");
                self.audit.record(
                    provider_name,
                    actions::CONNECTION_TEST_FAILED,
                    actor,
                    json!({ "error": err.audit_message() }),
                )?;
                Err(err)
            }
        }
    }

    /// Valid-now bearer token for any authenticated downstream call.
    pub async fn ensure_fresh_token(&self, provider_name: &str) -> Result<String, LifecycleError> {
        self.guard.ensure_fresh(provider_name).await
    }

    /// Sanitized state for one provider. Never includes the secret or raw
    /// token values.
    pub fn read_state(&self, provider_name: &str) -> Result<Option<IntegrationState>, LifecycleError> {
        Ok(self
            .store
            .get(provider_name)?
            .as_ref()
            .map(IntegrationState::from))
    }

    /// Sanitized state for every saved provider.
    pub fn list_states(&self) -> Result<Vec<IntegrationState>, LifecycleError> {
        Ok(self
            .store
            .list()?
            .iter()
            .map(IntegrationState::from)
            .collect())
    }

    fn require_record(&self, provider_name: &str) -> Result<ProviderCredential, LifecycleError> {
        self.store.get(provider_name)?.ok_or_else(|| {
            LifecycleError::NotConfigured(format!(
                "No credentials saved for provider '{provider_name}'"
            ))
        })
    }

    fn require_profile(
        &self,
        provider_name: &str,
    ) -> Result<&'static provider::ProviderProfile, LifecycleError> {
        provider::get_provider_profile(provider_name).ok_or_else(|| {
            LifecycleError::NotConfigured(format!("Unknown provider '{provider_name}'"))
        })
    }

    fn open_secret(&self, record: &ProviderCredential) -> Result<String, LifecycleError> {
        match self.store.open_client_secret(record) {
            Ok(Some(secret)) => Ok(secret),
            Ok(None) => Err(LifecycleError::SecretUnavailable(
                "no client secret on file".to_string(),
            )),
            Err(e) => Err(LifecycleError::SecretUnavailable(e.to_string())),
        }
    }
}
