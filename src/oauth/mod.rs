//! OAuth 2.0 handshakes for external provider integrations.
//!
//! Authorization-code flow:
//! 1. Caller saves instance/client credentials
//! 2. `start` builds the provider authorization URL with a single-use
//!    anti-CSRF state persisted on the credential record
//! 3. User authorizes on the provider's site
//! 4. Provider redirects back with `code` and `state`
//! 5. Exchange validates the state, decrypts the client secret, and trades
//!    the code for tokens
//! 6. Activation is a separate explicit connect action
//!
//! Client-credentials flow skips steps 2-4: the secret alone buys tokens.

pub mod handshake;
pub mod provider;
pub mod refresh;

pub use provider::{get_provider_profile, is_valid_provider, ProviderProfile};
pub use refresh::TokenRefreshGuard;
