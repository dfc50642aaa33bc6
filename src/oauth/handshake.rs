//! Token endpoint exchanges.
//!
//! Form-encoded POSTs for the three grants this subsystem uses:
//! authorization-code exchange, client-credentials issue, and refresh.
//! Every call goes through the shared reqwest client, which carries the
//! configured timeout; a timed-out or failed request surfaces as a
//! `TokenExchange` error, never a hang.

use crate::credentials::TokenGrant;
use crate::error::LifecycleError;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Token response (standard OAuth 2.0).
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    /// Converts the wire response into a grant with an absolute expiry.
    fn into_grant(self) -> TokenGrant {
        let expires_at = self
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));
        TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            scope: self.scope,
            token_type: self.token_type,
        }
    }
}

/// Exchange an authorization code for tokens.
pub async fn exchange_authorization_code(
    client: &reqwest::Client,
    token_url: &str,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenGrant, LifecycleError> {
    let mut form = HashMap::new();
    form.insert("grant_type", "authorization_code");
    form.insert("code", code);
    form.insert("redirect_uri", redirect_uri);
    form.insert("client_id", client_id);
    form.insert("client_secret", client_secret);

    tracing::debug!(token_url = %token_url, "Exchanging authorization code for tokens");
    post_token_request(client, token_url, &form).await
}

/// Issue tokens via the client-credentials grant. No code, state, or
/// redirect URI involved.
pub async fn acquire_client_credentials(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenGrant, LifecycleError> {
    let mut form = HashMap::new();
    form.insert("grant_type", "client_credentials");
    form.insert("client_id", client_id);
    form.insert("client_secret", client_secret);

    tracing::debug!(token_url = %token_url, "Requesting client-credentials token");
    post_token_request(client, token_url, &form).await
}

/// Exchange a refresh token for a new access token.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_url: &str,
    refresh_token: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenGrant, LifecycleError> {
    let mut form = HashMap::new();
    form.insert("grant_type", "refresh_token");
    form.insert("refresh_token", refresh_token);
    form.insert("client_id", client_id);
    form.insert("client_secret", client_secret);

    tracing::debug!(token_url = %token_url, "Refreshing access token");
    post_token_request(client, token_url, &form).await
}

/// POST a form to the token endpoint and parse the standard response.
///
/// The form may contain the client secret; the error path only ever carries
/// the upstream status and response body.
async fn post_token_request(
    client: &reqwest::Client,
    token_url: &str,
    form: &HashMap<&str, &str>,
) -> Result<TokenGrant, LifecycleError> {
    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| LifecycleError::TokenExchange {
            status: None,
            body: format!("request failed: {e}"),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        return Err(LifecycleError::TokenExchange {
            status: Some(status.as_u16()),
            body,
        });
    }

    let token_response: TokenResponse =
        response
            .json()
            .await
            .map_err(|e| LifecycleError::TokenExchange {
                status: Some(status.as_u16()),
                body: format!("unparseable token response: {e}"),
            })?;

    tracing::debug!(
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Token endpoint returned success"
    );

    Ok(token_response.into_grant())
}
