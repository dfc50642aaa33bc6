//! Provider profiles for supported external integrations.
//!
//! A profile pins the OAuth endpoints relative to the tenant instance URL
//! and the domain suffixes an instance is allowed to live under.

use crate::error::LifecycleError;
use url::Url;

/// Endpoint and validation profile for one integration provider.
#[derive(Clone, Debug)]
pub struct ProviderProfile {
    pub name: &'static str,
    /// Authorization endpoint path on the instance.
    pub authorize_path: &'static str,
    /// Token endpoint path on the instance.
    pub token_path: &'static str,
    /// Cheap authenticated GET used by the connection test.
    pub probe_path: &'static str,
    /// Domain suffixes an instance URL must match.
    pub allowed_suffixes: &'static [&'static str],
}

/// Look up a provider profile by name.
pub fn get_provider_profile(name: &str) -> Option<&'static ProviderProfile> {
    PROFILES.iter().find(|p| p.name == name)
}

/// Check if a provider name is supported.
pub fn is_valid_provider(name: &str) -> bool {
    get_provider_profile(name).is_some()
}

static PROFILES: &[ProviderProfile] = &[
    ProviderProfile {
        name: "servicenow",
        authorize_path: "/oauth_auth.do",
        token_path: "/oauth_token.do",
        probe_path: "/api/now/table/sys_user?sysparm_limit=1",
        allowed_suffixes: &[".service-now.com"],
    },
    ProviderProfile {
        name: "zendesk",
        authorize_path: "/oauth/authorizations/new",
        token_path: "/oauth/tokens",
        probe_path: "/api/v2/users/me.json",
        allowed_suffixes: &[".zendesk.com"],
    },
];

impl ProviderProfile {
    /// Validates a tenant instance URL: HTTPS with a host under one of the
    /// provider's allowed domain suffixes. `allow_insecure` (dev/test mode)
    /// only requires the URL to parse.
    pub fn validate_instance_url(
        &self,
        instance: &str,
        allow_insecure: bool,
    ) -> Result<(), LifecycleError> {
        let url = Url::parse(instance)
            .map_err(|_| LifecycleError::Validation(format!("Invalid instance URL: {instance}")))?;

        if allow_insecure {
            return Ok(());
        }

        if url.scheme() != "https" {
            return Err(LifecycleError::Validation(
                "Instance URL must use https".to_string(),
            ));
        }

        let host = url
            .host_str()
            .ok_or_else(|| LifecycleError::Validation("Instance URL has no host".to_string()))?;

        if !self.allowed_suffixes.iter().any(|s| host.ends_with(s)) {
            return Err(LifecycleError::Validation(format!(
                "Instance host '{}' is not under an allowed domain for {} ({})",
                host,
                self.name,
                self.allowed_suffixes.join(", ")
            )));
        }

        Ok(())
    }

    /// Token endpoint for a tenant instance.
    pub fn token_url(&self, instance: &str) -> String {
        format!("{}{}", instance.trim_end_matches('/'), self.token_path)
    }

    /// Connectivity-probe URL for a tenant instance.
    pub fn probe_url(&self, instance: &str) -> String {
        format!("{}{}", instance.trim_end_matches('/'), self.probe_path)
    }

    /// Authorization URL for the code grant, with percent-encoded params.
    pub fn authorize_url(
        &self,
        instance: &str,
        client_id: &str,
        redirect_uri: &str,
        state: &str,
    ) -> String {
        format!(
            "{}{}?response_type=code&client_id={}&redirect_uri={}&state={}",
            instance.trim_end_matches('/'),
            self.authorize_path,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        )
    }
}
