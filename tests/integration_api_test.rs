// Integration tests for the integration lifecycle API

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use std::time::Duration;
use tether::api::{create_router, ApiState};
use tether::audit::AuditLog;
use tether::credentials::{CredentialStore, Database, SecretCipher, TokenGrant};
use tether::manager::{IntegrationManager, ManagerConfig};
use tower::ServiceExt;

struct TestStack {
    app: Router,
    store: Arc<CredentialStore>,
}

fn create_test_stack(strict_validation: bool) -> TestStack {
    let db = Database::in_memory().unwrap();
    let cipher = SecretCipher::from_base64_key(&BASE64.encode([0u8; 32])).unwrap();
    let store = Arc::new(CredentialStore::new(db.clone(), cipher));
    let audit = Arc::new(AuditLog::new(db));
    let manager = Arc::new(
        IntegrationManager::new(
            Arc::clone(&store),
            audit,
            ManagerConfig {
                allow_insecure_instances: !strict_validation,
                http_timeout: Duration::from_secs(5),
            },
        )
        .unwrap(),
    );

    TestStack {
        app: create_router(ApiState { manager }),
        store,
    }
}

fn put_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

const SAVE_BODY: &str = r#"{
    "instance": "https://acme.service-now.com",
    "clientId": "client-abc",
    "clientSecret": "s3cret",
    "grantType": "client_credentials"
}"#;

#[tokio::test]
async fn test_save_rejects_non_https_instance() {
    let stack = create_test_stack(true);

    let body = r#"{
        "instance": "http://acme.service-now.com",
        "clientId": "client-abc",
        "clientSecret": "s3cret",
        "grantType": "client_credentials"
    }"#;
    let response = stack
        .app
        .clone()
        .oneshot(put_json("/api/integrations/servicenow/credentials", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["ok"], false);
    assert!(json["message"].as_str().unwrap().contains("https"));

    // Nothing was persisted
    let response = stack
        .app
        .clone()
        .oneshot(get("/api/integrations/servicenow"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_save_rejects_disallowed_domain() {
    let stack = create_test_stack(true);

    let body = r#"{
        "instance": "https://acme.example.com",
        "clientId": "client-abc",
        "clientSecret": "s3cret",
        "grantType": "client_credentials"
    }"#;
    let response = stack
        .app
        .clone()
        .oneshot(put_json("/api/integrations/servicenow/credentials", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_save_rejects_unknown_provider() {
    let stack = create_test_stack(false);

    let response = stack
        .app
        .clone()
        .oneshot(put_json("/api/integrations/jira/credentials", SAVE_BODY))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("jira"));
}

#[tokio::test]
async fn test_save_and_read_state_never_leaks_secrets() {
    let stack = create_test_stack(false);

    let response = stack
        .app
        .clone()
        .oneshot(put_json("/api/integrations/servicenow/credentials", SAVE_BODY))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["saved"], true);
    assert_eq!(json["reauthLikely"], false);

    // Seed tokens directly, then read the state back
    stack
        .store
        .update_tokens(
            "servicenow",
            &TokenGrant {
                access_token: "raw-access-token".to_string(),
                refresh_token: Some("raw-refresh-token".to_string()),
                expires_at: None,
                scope: None,
                token_type: None,
            },
        )
        .unwrap();

    let response = stack
        .app
        .clone()
        .oneshot(get("/api/integrations/servicenow"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let raw = String::from_utf8(body.to_vec()).unwrap();
    assert!(!raw.contains("s3cret"));
    assert!(!raw.contains("raw-access-token"));
    assert!(!raw.contains("raw-refresh-token"));

    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["instance"], "https://acme.service-now.com");
    assert_eq!(json["clientId"], "client-abc");
    assert_eq!(json["grantType"], "client_credentials");
    assert_eq!(json["connected"], false);
    assert_eq!(json["hasTokens"], true);
    assert_eq!(json["status"], "token_acquired");
}

#[tokio::test]
async fn test_list_integrations() {
    let stack = create_test_stack(false);

    let response = stack
        .app
        .clone()
        .oneshot(get("/api/integrations"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["integrations"].as_array().unwrap().len(), 0);

    stack
        .app
        .clone()
        .oneshot(put_json("/api/integrations/servicenow/credentials", SAVE_BODY))
        .await
        .unwrap();

    let response = stack
        .app
        .clone()
        .oneshot(get("/api/integrations"))
        .await
        .unwrap();
    let json = body_json(response).await;
    let integrations = json["integrations"].as_array().unwrap();
    assert_eq!(integrations.len(), 1);
    assert_eq!(integrations[0]["provider"], "servicenow");
}

#[tokio::test]
async fn test_oauth_start_requires_configuration() {
    let stack = create_test_stack(false);

    let response = stack
        .app
        .clone()
        .oneshot(get("/api/integrations/servicenow/oauth/start"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["ok"], false);
}

#[tokio::test]
async fn test_oauth_start_returns_authorize_url() {
    let stack = create_test_stack(false);

    let body = r#"{
        "instance": "https://acme.service-now.com",
        "clientId": "client-abc",
        "clientSecret": "s3cret",
        "grantType": "authorization_code",
        "redirectUri": "https://app.example.com/callback"
    }"#;
    stack
        .app
        .clone()
        .oneshot(put_json("/api/integrations/servicenow/credentials", body))
        .await
        .unwrap();

    let response = stack
        .app
        .clone()
        .oneshot(get("/api/integrations/servicenow/oauth/start"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let url = json["authorizeUrl"].as_str().unwrap();
    assert!(url.starts_with("https://acme.service-now.com/oauth_auth.do?"));
    assert!(url.contains("response_type=code"));
    assert!(url.contains("state="));
}

#[tokio::test]
async fn test_callback_surfaces_provider_error_without_exchange() {
    let stack = create_test_stack(false);

    let response = stack
        .app
        .clone()
        .oneshot(get(
            "/api/integrations/servicenow/oauth/callback?error=access_denied&error_description=User+cancelled",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("access_denied"));
}

#[tokio::test]
async fn test_callback_requires_code() {
    let stack = create_test_stack(false);

    let response = stack
        .app
        .clone()
        .oneshot(get("/api/integrations/servicenow/oauth/callback?state=abc"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("code"));
}

#[tokio::test]
async fn test_connect_without_tokens_is_rejected() {
    let stack = create_test_stack(false);

    stack
        .app
        .clone()
        .oneshot(put_json("/api/integrations/servicenow/credentials", SAVE_BODY))
        .await
        .unwrap();

    let response = stack
        .app
        .clone()
        .oneshot(post_empty("/api/integrations/servicenow/connect"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["ok"], false);
}

#[tokio::test]
async fn test_disconnect_keeps_configuration() {
    let stack = create_test_stack(false);

    stack
        .app
        .clone()
        .oneshot(put_json("/api/integrations/servicenow/credentials", SAVE_BODY))
        .await
        .unwrap();
    stack
        .store
        .update_tokens(
            "servicenow",
            &TokenGrant {
                access_token: "tok1".to_string(),
                refresh_token: None,
                expires_at: None,
                scope: None,
                token_type: None,
            },
        )
        .unwrap();

    let response = stack
        .app
        .clone()
        .oneshot(post_empty("/api/integrations/servicenow/connect"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = stack
        .app
        .clone()
        .oneshot(post_empty("/api/integrations/servicenow/disconnect"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = stack
        .app
        .clone()
        .oneshot(get("/api/integrations/servicenow"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["connected"], false);
    assert_eq!(json["status"], "disconnected");
    assert_eq!(json["instance"], "https://acme.service-now.com");
    assert_eq!(json["clientId"], "client-abc");
}

#[tokio::test]
async fn test_test_endpoint_requires_connection() {
    let stack = create_test_stack(false);

    stack
        .app
        .clone()
        .oneshot(put_json("/api/integrations/servicenow/credentials", SAVE_BODY))
        .await
        .unwrap();

    let response = stack
        .app
        .clone()
        .oneshot(post_empty("/api/integrations/servicenow/test"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["ok"], false);
}

#[tokio::test]
async fn test_audit_trail_records_actor() {
    let stack = create_test_stack(false);

    let request = Request::builder()
        .method("PUT")
        .uri("/api/integrations/servicenow/credentials")
        .header("content-type", "application/json")
        .header("x-actor", "alice")
        .body(Body::from(SAVE_BODY.to_string()))
        .unwrap();
    stack.app.clone().oneshot(request).await.unwrap();

    let response = stack
        .app
        .clone()
        .oneshot(get("/api/integrations/servicenow/audit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "credentials.saved");
    assert_eq!(entries[0]["actor"], "alice");
    // Audit details carry flags only, never the secret
    assert!(!json.to_string().contains("s3cret"));
}
