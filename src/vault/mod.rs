//! Vault collaborators.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Client-credentials exchange against the vault identity service |
//! | [`tunnel`] | HTTP client routed through the vault's outbound proxy |

pub mod auth;
pub mod tunnel;

pub use auth::{AuthError, AuthTokenClient, ServiceCredentials, VaultCredential};
pub use tunnel::{ProxyRoute, ProxyScheme, ProxyTunnel, TunnelError};
