//! Proxy Tunnel Builder.
//!
//! A [`ProxyTunnel`] is an HTTP client whose every request goes through the vault's
//! outbound route at `{vault_id}.{environment}.{domain}`. The route replaces aliases in
//! the request body with the card data they stand for, so requests that carry aliases
//! must be sent through the tunnel and nothing else.
//!
//! Building a tunnel is pure configuration. Connection failures show up on first use.

use reqwest::{Certificate, Client, Proxy};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::instrument;
use url::Url;
use vault_handoff_types::flow::{ErrorKind, VaultInfo};

use crate::config::config_defaults::{DEFAULT_PROXY_DOMAIN, DEFAULT_PROXY_PORT};
use crate::psp::PspCredentials;
use crate::vault::auth::VaultCredential;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    #[default]
    Https,
    Http,
}

impl Display for ProxyScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyScheme::Https => f.write_str("https"),
            ProxyScheme::Http => f.write_str("http"),
        }
    }
}

/// Process-wide description of the vault's outbound route.
#[derive(Debug)]
pub struct ProxyRoute {
    vault_id: String,
    environment: String,
    domain: String,
    port: u16,
    scheme: ProxyScheme,
    username: String,
    password: SecretString,
    connect_ip: Option<IpAddr>,
    ca_certificate: Option<Vec<u8>>,
}

impl ProxyRoute {
    pub fn new(
        vault_id: impl Into<String>,
        environment: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            vault_id: vault_id.into(),
            environment: environment.into(),
            domain: DEFAULT_PROXY_DOMAIN.to_string(),
            port: DEFAULT_PROXY_PORT,
            scheme: ProxyScheme::default(),
            username: username.into(),
            password,
            connect_ip: None,
            ca_certificate: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_scheme(mut self, scheme: ProxyScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Connects to `ip` while keeping the route hostname as the proxy identity.
    pub fn with_connect_ip(mut self, ip: IpAddr) -> Self {
        self.connect_ip = Some(ip);
        self
    }

    /// Trusts the PEM-encoded root certificate for the route.
    pub fn with_ca_certificate(mut self, pem: Vec<u8>) -> Self {
        self.ca_certificate = Some(pem);
        self
    }

    pub fn hostname(&self) -> String {
        format!("{}.{}.{}", self.vault_id, self.environment, self.domain)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn proxy_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}://{}:{}",
            self.scheme,
            self.hostname(),
            self.port
        ))
    }

    pub fn vault_info(&self) -> VaultInfo {
        VaultInfo {
            vault_id: self.vault_id.clone(),
            environment: self.environment.clone(),
        }
    }
}

/// Errors raised while building a [`ProxyTunnel`].
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Vault credential expired before the tunnel was built")]
    CredentialExpired,
    #[error("Proxy credentials must differ from the PSP API credentials")]
    ReusedPspCredentials,
    #[error("Invalid proxy route: {0}")]
    InvalidRoute(#[from] url::ParseError),
    #[error("Invalid proxy CA certificate: {0}")]
    Certificate(#[source] reqwest::Error),
    #[error("Failed to build tunnel client: {0}")]
    Build(#[source] reqwest::Error),
}

impl TunnelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TunnelError::CredentialExpired => ErrorKind::Auth,
            TunnelError::ReusedPspCredentials
            | TunnelError::InvalidRoute(_)
            | TunnelError::Certificate(_)
            | TunnelError::Build(_) => ErrorKind::ProxyConnection,
        }
    }
}

/// An HTTP client routed through the vault's outbound route.
///
/// Built fresh for each orchestration and dropped with it.
#[derive(Debug)]
pub struct ProxyTunnel {
    client: Client,
    hostname: String,
    timeout: Duration,
}

impl ProxyTunnel {
    /// Builds a tunnel for one orchestration.
    ///
    /// The credential must still be valid, and the route's proxy credentials must not
    /// be the PSP's API key.
    #[instrument(
        name = "vault.tunnel.build",
        skip_all,
        err,
        fields(hostname = %route.hostname(), port = route.port)
    )]
    pub fn build(
        route: &ProxyRoute,
        credential: &VaultCredential,
        psp: &PspCredentials,
        timeout: Duration,
    ) -> Result<Self, TunnelError> {
        if credential.is_expired() {
            return Err(TunnelError::CredentialExpired);
        }
        if psp.matches(&route.username) || psp.matches(route.password.expose_secret()) {
            return Err(TunnelError::ReusedPspCredentials);
        }

        let hostname = route.hostname();
        let proxy = Proxy::all(route.proxy_url()?)
            .map_err(TunnelError::Build)?
            .basic_auth(&route.username, route.password.expose_secret());

        let mut builder = Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .connect_timeout(timeout);
        if let Some(ip) = route.connect_ip {
            // The port of the override address is ignored; the route URL carries it.
            builder = builder.resolve(&hostname, SocketAddr::new(ip, route.port));
        }
        if let Some(pem) = &route.ca_certificate {
            let certificate = Certificate::from_pem(pem).map_err(TunnelError::Certificate)?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder.build().map_err(TunnelError::Build)?;

        tracing::debug!(connect_ip = ?route.connect_ip, "Tunnel ready");
        Ok(Self {
            client,
            hostname,
            timeout,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_handoff_types::timestamp::UnixTimestamp;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn route() -> ProxyRoute {
        ProxyRoute::new("tntest", "sandbox", "proxy-user", secret("proxy-pass"))
    }

    fn credential() -> VaultCredential {
        VaultCredential::new(secret("vault-token"), "Bearer", None)
    }

    fn psp() -> PspCredentials {
        PspCredentials::new(secret("sk_test_123"))
    }

    #[test]
    fn test_route_hostname_and_url() {
        let route = route();
        assert_eq!(route.hostname(), "tntest.sandbox.verygoodproxy.com");
        let url = route.proxy_url().unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("tntest.sandbox.verygoodproxy.com"));
        assert_eq!(url.port(), Some(8443));
        assert_eq!(
            route.vault_info(),
            VaultInfo {
                vault_id: "tntest".to_string(),
                environment: "sandbox".to_string()
            }
        );
    }

    #[test]
    fn test_build_sets_tunnel_hostname() {
        let tunnel = ProxyTunnel::build(
            &route().with_connect_ip("127.0.0.1".parse().unwrap()),
            &credential(),
            &psp(),
            Duration::from_secs(8),
        )
        .unwrap();
        assert_eq!(tunnel.hostname(), "tntest.sandbox.verygoodproxy.com");
        assert_eq!(tunnel.timeout(), Duration::from_secs(8));
    }

    #[test]
    fn test_build_rejects_expired_credential() {
        let expired = VaultCredential::new(
            secret("vault-token"),
            "Bearer",
            Some(UnixTimestamp::from_secs(1)),
        );
        let err =
            ProxyTunnel::build(&route(), &expired, &psp(), Duration::from_secs(8)).unwrap_err();
        assert!(matches!(err, TunnelError::CredentialExpired));
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[test]
    fn test_build_rejects_psp_key_as_proxy_credentials() {
        let reused = ProxyRoute::new("tntest", "sandbox", "proxy-user", secret("sk_test_123"));
        let err =
            ProxyTunnel::build(&reused, &credential(), &psp(), Duration::from_secs(8)).unwrap_err();
        assert!(matches!(err, TunnelError::ReusedPspCredentials));
        assert_eq!(err.kind(), ErrorKind::ProxyConnection);

        let reused = ProxyRoute::new("tntest", "sandbox", "sk_test_123", secret("proxy-pass"));
        assert!(ProxyTunnel::build(&reused, &credential(), &psp(), Duration::from_secs(8)).is_err());
    }
}
