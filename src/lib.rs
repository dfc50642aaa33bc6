// Credential records, cipher, and storage
pub mod credentials;

// Append-only lifecycle ledger
pub mod audit;

// OAuth handshakes and the refresh guard
pub mod oauth;

// Lifecycle orchestration and state machine
pub mod manager;

// HTTP API
pub mod api;

// Runtime configuration
pub mod config;

// Error taxonomy
pub mod error;
