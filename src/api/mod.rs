//! HTTP boundary for the integration lifecycle.
//!
//! Thin axum handlers over [`IntegrationManager`]: every failure is one of
//! the typed lifecycle errors, rendered as `{ok: false, message}` with the
//! taxonomy's status code. Raw upstream or storage errors never reach the
//! wire.

use crate::credentials::{GrantType, SaveCredentialFields};
use crate::error::LifecycleError;
use crate::manager::IntegrationManager;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Shared application state for the integration API
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<IntegrationManager>,
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    message: String,
}

struct ApiError(LifecycleError);

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(ErrorResponse {
            ok: false,
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

/// Request body for saving credentials
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCredentialsRequest {
    pub instance: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub grant_type: GrantType,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    ok: bool,
    saved: bool,
    reauth_likely: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartOAuthResponse {
    ok: bool,
    authorize_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokensSavedResponse {
    ok: bool,
    tokens_saved: bool,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Serialize)]
struct TestResponse {
    ok: bool,
    msg: String,
    data: serde_json::Value,
}

/// OAuth callback query parameters from the provider redirect
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Create the integration API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/integrations", get(list_integrations))
        .route("/api/integrations/:provider", get(read_state))
        .route("/api/integrations/:provider/credentials", put(save_credentials))
        .route("/api/integrations/:provider/oauth/start", get(oauth_start))
        .route("/api/integrations/:provider/oauth/callback", get(oauth_callback))
        .route("/api/integrations/:provider/token", post(acquire_token))
        .route("/api/integrations/:provider/connect", post(connect))
        .route("/api/integrations/:provider/disconnect", post(disconnect))
        .route("/api/integrations/:provider/test", post(test_connection))
        .route("/api/integrations/:provider/audit", get(audit_trail))
        .with_state(Arc::new(state))
}

/// Audit actor for a request: the `X-Actor` header, a bearer token
/// identity, or `system`.
fn actor_from_headers(headers: &HeaderMap) -> String {
    if let Some(actor) = headers.get("x-actor").and_then(|v| v.to_str().ok()) {
        if !actor.trim().is_empty() {
            return actor.trim().to_string();
        }
    }
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = parse_bearer_token(auth) {
            return token;
        }
    }
    "system".to_string()
}

/// Parse a "Bearer <token>" Authorization header value.
fn parse_bearer_token(header_value: &str) -> Option<String> {
    let mut parts = header_value.splitn(2, ' ');
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// GET /api/integrations
async fn list_integrations(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let integrations = state.manager.list_states()?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "integrations": integrations,
    })))
}

/// GET /api/integrations/:provider
///
/// Sanitized state: never the secret or raw tokens.
async fn read_state(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
) -> Result<Response, ApiError> {
    match state.manager.read_state(&provider)? {
        Some(integration) => Ok(Json(integration).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                ok: false,
                message: format!("No credentials saved for provider '{provider}'"),
            }),
        )
            .into_response()),
    }
}

/// PUT /api/integrations/:provider/credentials
async fn save_credentials(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SaveCredentialsRequest>,
) -> Result<Json<SaveResponse>, ApiError> {
    debug!(provider = %provider, "Save credentials requested");

    let fields = SaveCredentialFields {
        instance_url: req.instance,
        client_id: req.client_id,
        client_secret: req.client_secret,
        grant_type: req.grant_type,
        redirect_uri: req.redirect_uri,
    };
    let outcome =
        state
            .manager
            .save_credentials(&provider, &actor_from_headers(&headers), &fields)?;

    Ok(Json(SaveResponse {
        ok: true,
        saved: true,
        reauth_likely: outcome.reauth_likely,
    }))
}

/// GET /api/integrations/:provider/oauth/start
async fn oauth_start(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StartOAuthResponse>, ApiError> {
    debug!(provider = %provider, "OAuth start requested");

    let authorize_url = state
        .manager
        .start_oauth(&provider, &actor_from_headers(&headers))?;

    Ok(Json(StartOAuthResponse {
        ok: true,
        authorize_url,
    }))
}

/// GET /api/integrations/:provider/oauth/callback
///
/// Provider redirect target. A provider-reported `error` is surfaced
/// without attempting the exchange; a missing `code` fails fast.
async fn oauth_callback(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<TokensSavedResponse>, ApiError> {
    debug!(provider = %provider, "OAuth callback received");

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "no description".to_string());
        return Err(LifecycleError::Validation(format!(
            "OAuth authorization failed: {error} - {description}"
        ))
        .into());
    }

    let code = callback
        .code
        .ok_or_else(|| LifecycleError::Validation("Missing 'code' parameter".to_string()))?;

    state
        .manager
        .exchange_code(
            &provider,
            &actor_from_headers(&headers),
            &code,
            callback.state.as_deref(),
        )
        .await?;

    Ok(Json(TokensSavedResponse {
        ok: true,
        tokens_saved: true,
    }))
}

/// POST /api/integrations/:provider/token
async fn acquire_token(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TokensSavedResponse>, ApiError> {
    state
        .manager
        .acquire_client_credentials_token(&provider, &actor_from_headers(&headers))
        .await?;

    Ok(Json(TokensSavedResponse {
        ok: true,
        tokens_saved: true,
    }))
}

/// POST /api/integrations/:provider/connect
async fn connect(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, ApiError> {
    state
        .manager
        .connect(&provider, &actor_from_headers(&headers))?;
    Ok(Json(OkResponse { ok: true }))
}

/// POST /api/integrations/:provider/disconnect
async fn disconnect(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, ApiError> {
    state
        .manager
        .disconnect(&provider, &actor_from_headers(&headers))?;
    Ok(Json(OkResponse { ok: true }))
}

/// POST /api/integrations/:provider/test
async fn test_connection(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TestResponse>, ApiError> {
    let outcome = state
        .manager
        .test_connection(&provider, &actor_from_headers(&headers))
        .await?;

    Ok(Json(TestResponse {
        ok: true,
        msg: outcome.message,
        data: outcome.data,
    }))
}

/// GET /api/integrations/:provider/audit
async fn audit_trail(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state
        .manager
        .audit()
        .list(&provider, 50)
        .map_err(LifecycleError::Storage)?;

    Ok(Json(serde_json::json!({
        "ok": true,
        "entries": entries,
    })))
}
