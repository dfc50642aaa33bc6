use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tether::api::{create_router, ApiState};
use tether::audit::AuditLog;
use tether::config;
use tether::credentials::{CredentialStore, Database, SecretCipher};
use tether::manager::{IntegrationManager, ManagerConfig};
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=info".into()),
        )
        .init();

    let config = config::load_from_env().context("Failed to load configuration")?;

    let key = std::env::var(config::ENCRYPTION_KEY_ENV).with_context(|| {
        format!(
            "{} must be set to a base64-encoded 32-byte key",
            config::ENCRYPTION_KEY_ENV
        )
    })?;
    let cipher = SecretCipher::from_base64_key(&key).context("Invalid encryption key")?;

    let db = Database::open(&config.store.db_path)
        .with_context(|| format!("Failed to open credential database {}", config.store.db_path))?;
    let store = Arc::new(CredentialStore::new(db.clone(), cipher));
    let audit = Arc::new(AuditLog::new(db));

    let manager = Arc::new(IntegrationManager::new(
        store,
        audit,
        ManagerConfig {
            allow_insecure_instances: config.security.allow_insecure_instances,
            http_timeout: Duration::from_secs(config.http.timeout_seconds),
        },
    )?);

    let app = create_router(ApiState { manager }).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "tether listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
