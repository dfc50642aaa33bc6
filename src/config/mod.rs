//! Runtime configuration.
//!
//! Loaded from a TOML file (path in `TETHER_CONFIG`, default
//! `tether.toml`); every section falls back to defaults when absent. The
//! encryption master key is deliberately NOT part of the file: it comes
//! only from the `TETHER_ENCRYPTION_KEY` environment variable.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable holding the base64-encoded 32-byte master key.
pub const ENCRYPTION_KEY_ENV: &str = "TETHER_ENCRYPTION_KEY";

/// Environment variable selecting the config file path.
pub const CONFIG_PATH_ENV: &str = "TETHER_CONFIG";

/// Complete tether configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TetherConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Credential store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "tether.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bound on every call to a provider's endpoints (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Validation relaxations for development
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// Skip the HTTPS/domain-suffix instance check. Never enable in
    /// production.
    #[serde(default)]
    pub allow_insecure_instances: bool,
}

/// Load configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TetherConfig> {
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
    let config: TetherConfig = toml::from_str(&contents).context("Failed to parse config file")?;
    Ok(config)
}

/// Load from the `TETHER_CONFIG` path, or defaults when no file exists.
pub fn load_from_env() -> Result<TetherConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "tether.toml".to_string());
    if Path::new(&path).exists() {
        load_config(&path)
    } else {
        Ok(TetherConfig::default())
    }
}
