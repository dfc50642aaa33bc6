//! Expiry-aware token refresh guard.
//!
//! Called before any authenticated request to a provider instance. Returns
//! a bearer token that is valid right now, transparently refreshing an
//! expired one via the refresh token or a client-credentials re-issue.
//!
//! Safe to call concurrently for the same provider: two racing callers may
//! both refresh, but token persistence is a partial-field update, so the
//! second write only replaces token columns and cannot revert anything else.

use crate::audit::{actions, AuditLog};
use crate::credentials::{CredentialStore, GrantType, ProviderCredential};
use crate::error::LifecycleError;
use crate::oauth::{handshake, provider};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Audit actor for unattended refreshes.
const SYSTEM_ACTOR: &str = "system";

pub struct TokenRefreshGuard {
    store: Arc<CredentialStore>,
    audit: Arc<AuditLog>,
    http: reqwest::Client,
}

impl TokenRefreshGuard {
    pub fn new(store: Arc<CredentialStore>, audit: Arc<AuditLog>, http: reqwest::Client) -> Self {
        Self { store, audit, http }
    }

    /// Returns an access token guaranteed to be unexpired.
    ///
    /// Fails `NotConnected` unless the provider is explicitly connected and
    /// has a token on file. An expired token with no working refresh path
    /// fails `ReauthRequired` and leaves the connection status untouched.
    pub async fn ensure_fresh(&self, provider_name: &str) -> Result<String, LifecycleError> {
        let record = self
            .store
            .get(provider_name)?
            .ok_or(LifecycleError::NotConnected)?;

        if !record.connected() {
            return Err(LifecycleError::NotConnected);
        }
        let access_token = record
            .access_token
            .clone()
            .ok_or(LifecycleError::NotConnected)?;

        if !record.token_expired(Utc::now()) {
            debug!(provider = %provider_name, "Access token still valid");
            return Ok(access_token);
        }

        info!(provider = %provider_name, "Access token expired, refreshing");
        self.refresh(&record).await
    }

    async fn refresh(&self, record: &ProviderCredential) -> Result<String, LifecycleError> {
        let profile = provider::get_provider_profile(&record.provider).ok_or_else(|| {
            LifecycleError::NotConfigured(format!("Unknown provider '{}'", record.provider))
        })?;
        let token_url = profile.token_url(&record.instance_url);

        if let Some(refresh_token) = &record.refresh_token {
            // Refresh-token path: any failure here means the user has to
            // re-run the OAuth flow.
            let secret = match self.store.open_client_secret(record) {
                Ok(Some(secret)) => secret,
                Ok(None) => {
                    self.audit_refresh_failure(&record.provider, "no client secret on file")?;
                    return Err(LifecycleError::ReauthRequired);
                }
                Err(e) => {
                    warn!(provider = %record.provider, error = %e, "Client secret undecryptable during refresh");
                    self.audit_refresh_failure(&record.provider, &e.to_string())?;
                    return Err(LifecycleError::ReauthRequired);
                }
            };

            match handshake::refresh_access_token(
                &self.http,
                &token_url,
                refresh_token,
                &record.client_id,
                &secret,
            )
            .await
            {
                Ok(mut grant) => {
                    // Keep the existing refresh token if the provider did
                    // not rotate it
                    if grant.refresh_token.is_none() {
                        grant.refresh_token = Some(refresh_token.clone());
                    }
                    self.store.update_tokens(&record.provider, &grant)?;
                    self.audit.record(
                        &record.provider,
                        actions::TOKEN_REFRESHED,
                        SYSTEM_ACTOR,
                        json!({ "expires_at": grant.expires_at.map(|dt| dt.to_rfc3339()) }),
                    )?;
                    info!(provider = %record.provider, "Access token refreshed");
                    Ok(grant.access_token)
                }
                Err(e) => {
                    warn!(provider = %record.provider, error = %e, "Token refresh failed");
                    self.audit_refresh_failure(&record.provider, &e.audit_message())?;
                    Err(LifecycleError::ReauthRequired)
                }
            }
        } else if record.grant_type == GrantType::ClientCredentials {
            // Machine-to-machine grant: re-issue without user interaction.
            let secret = match self.store.open_client_secret(record) {
                Ok(Some(secret)) => secret,
                Ok(None) => {
                    let err = LifecycleError::SecretUnavailable(
                        "no client secret on file".to_string(),
                    );
                    self.audit.record(
                        &record.provider,
                        actions::TOKEN_ACQUIRE_FAILED,
                        SYSTEM_ACTOR,
                        json!({ "error": err.audit_message() }),
                    )?;
                    return Err(err);
                }
                Err(e) => {
                    warn!(provider = %record.provider, error = %e, "Client secret undecryptable during re-issue");
                    let err = LifecycleError::SecretUnavailable(e.to_string());
                    self.audit.record(
                        &record.provider,
                        actions::TOKEN_ACQUIRE_FAILED,
                        SYSTEM_ACTOR,
                        json!({ "error": err.audit_message() }),
                    )?;
                    return Err(err);
                }
            };

            match handshake::acquire_client_credentials(
                &self.http,
                &token_url,
                &record.client_id,
                &secret,
            )
            .await
            {
                Ok(grant) => {
                    self.store.update_tokens(&record.provider, &grant)?;
                    self.audit.record(
                        &record.provider,
                        actions::TOKEN_ACQUIRED,
                        SYSTEM_ACTOR,
                        json!({
                            "reissued": true,
                            "expires_at": grant.expires_at.map(|dt| dt.to_rfc3339()),
                        }),
                    )?;
                    info!(provider = %record.provider, "Client-credentials token re-issued");
                    Ok(grant.access_token)
                }
                Err(e) => {
                    warn!(provider = %record.provider, error = %e, "Client-credentials re-issue failed");
                    self.audit.record(
                        &record.provider,
                        actions::TOKEN_ACQUIRE_FAILED,
                        SYSTEM_ACTOR,
                        json!({ "error": e.audit_message() }),
                    )?;
                    Err(e)
                }
            }
        } else {
            self.audit_refresh_failure(&record.provider, "expired token with no refresh path")?;
            Err(LifecycleError::ReauthRequired)
        }
    }

    fn audit_refresh_failure(&self, provider: &str, error: &str) -> Result<(), LifecycleError> {
        self.audit.record(
            provider,
            actions::TOKEN_REFRESH_FAILED,
            SYSTEM_ACTOR,
            json!({ "error": error }),
        )?;
        Ok(())
    }
}
