//! Error taxonomy for the credential lifecycle.
//!
//! Every fallible operation in the manager, handshake engine, and refresh
//! guard surfaces one of these variants. The HTTP layer maps them to status
//! codes with [`LifecycleError::status_code`]; the audit log records the
//! sanitized [`LifecycleError::audit_message`]. Neither path ever carries
//! a client secret, token, or encryption key.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Caller-supplied input was rejected before anything was persisted.
    #[error("{0}")]
    Validation(String),

    /// The provider has no saved credentials, so the operation cannot start.
    #[error("{0}")]
    NotConfigured(String),

    /// The `state` returned by the callback did not match the stored value.
    #[error("OAuth state mismatch")]
    CsrfValidation,

    /// Activation was requested but no usable access token exists.
    #[error("no usable access token; complete the token step first")]
    TokensMissing,

    /// Automatic recovery is exhausted; a human must redo the handshake.
    #[error("re-authorization required")]
    ReauthRequired,

    /// The operation requires an active connection and there is none.
    #[error("provider is not connected")]
    NotConnected,

    /// The token endpoint returned non-2xx or the request failed outright.
    /// Carries the upstream status and body for diagnostics; the client
    /// secret is never part of either.
    #[error("token exchange failed{}: {body}", status_suffix(.status))]
    TokenExchange { status: Option<u16>, body: String },

    /// The stored client secret could not be recovered, usually because the
    /// encryption key changed since it was saved.
    #[error("client secret unavailable: {0}")]
    SecretUnavailable(String),

    /// The connectivity probe reached the provider but got a bad answer.
    #[error("connection test failed: {0}")]
    TestFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" with status {code}"),
        None => String::new(),
    }
}

impl LifecycleError {
    /// HTTP status the API layer reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            LifecycleError::Validation(_)
            | LifecycleError::NotConfigured(_)
            | LifecycleError::CsrfValidation
            | LifecycleError::TokensMissing => 400,
            LifecycleError::ReauthRequired => 401,
            LifecycleError::NotConnected => 409,
            LifecycleError::TokenExchange { .. } => 502,
            LifecycleError::SecretUnavailable(_)
            | LifecycleError::TestFailed(_)
            | LifecycleError::Storage(_) => 500,
        }
    }

    /// Short description safe to persist in audit details.
    pub fn audit_message(&self) -> String {
        match self {
            // Storage errors can name file paths; keep the ledger generic.
            LifecycleError::Storage(_) => "internal storage error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_exchange_display_includes_status() {
        let err = LifecycleError::TokenExchange {
            status: Some(403),
            body: "access_denied".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("403"));
        assert!(msg.contains("access_denied"));
    }

    #[test]
    fn test_token_exchange_display_without_status() {
        let err = LifecycleError::TokenExchange {
            status: None,
            body: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(!msg.contains("status"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(LifecycleError::Validation("x".into()).status_code(), 400);
        assert_eq!(LifecycleError::CsrfValidation.status_code(), 400);
        assert_eq!(LifecycleError::TokensMissing.status_code(), 400);
        assert_eq!(LifecycleError::ReauthRequired.status_code(), 401);
        assert_eq!(LifecycleError::NotConnected.status_code(), 409);
        assert_eq!(
            LifecycleError::TokenExchange {
                status: Some(500),
                body: String::new()
            }
            .status_code(),
            502
        );
        assert_eq!(
            LifecycleError::SecretUnavailable("x".into()).status_code(),
            500
        );
    }

    #[test]
    fn test_storage_audit_message_is_generic() {
        let err = LifecycleError::Storage(anyhow::anyhow!("/var/lib/tether/tether.db is corrupt"));
        assert!(!err.audit_message().contains("/var/lib"));
    }
}
