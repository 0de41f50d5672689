//! Configuration module for the vault handoff server.
//!
//! Configuration is read from a JSON file whose path comes from `--config` or `$CONFIG`.
//! Credentials and deployment-specific values are usually written as `"$VAR"` references
//! and resolved from the environment (after `.env` is loaded):
//!
//! ```json
//! {
//!   "port": 3001,
//!   "vault": {
//!     "vault_id": "$VGS_VAULT_ID",
//!     "environment": "sandbox",
//!     "client_id": "$VGS_CLIENT_ID",
//!     "client_secret": "$VGS_CLIENT_SECRET",
//!     "proxy": {
//!       "username": "$VGS_PROXY_USERNAME",
//!       "password": "$VGS_PROXY_PASSWORD"
//!     }
//!   },
//!   "psp": {
//!     "secret_key": "$STRIPE_SECRET_KEY",
//!     "price_id": "$STRIPE_PRICE_ID"
//!   }
//! }
//! ```

use clap::Parser;
use secrecy::SecretString;
use serde::Deserialize;
use std::convert::Infallible;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use vault_handoff_types::config::LiteralOrEnv;

use crate::vault::tunnel::ProxyScheme;

/// CLI arguments for the vault handoff server.
#[derive(Parser, Debug)]
#[command(name = "vault-handoff")]
#[command(about = "Vault-to-PSP card handoff HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// A credential read from configuration. Redacted in `Debug` output.
#[derive(Debug)]
pub struct ConfigSecret(SecretString);

impl ConfigSecret {
    pub fn into_inner(self) -> SecretString {
        self.0
    }
}

impl FromStr for ConfigSecret {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ConfigSecret(SecretString::from(s.to_string())))
    }
}

/// Server configuration.
///
/// `port` and `host` fall back to environment variables, then to hardcoded defaults.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    vault: VaultConfig,
    psp: PspConfig,
    #[serde(default)]
    timeouts: TimeoutsConfig,
}

/// Vault identity service credentials and outbound route.
#[derive(Debug, Deserialize)]
pub struct VaultConfig {
    pub vault_id: LiteralOrEnv<String>,
    #[serde(default = "config_defaults::default_environment")]
    pub environment: LiteralOrEnv<String>,
    pub client_id: LiteralOrEnv<String>,
    pub client_secret: LiteralOrEnv<ConfigSecret>,
    #[serde(default = "config_defaults::default_token_url")]
    pub token_url: LiteralOrEnv<Url>,
    pub proxy: ProxyConfig,
}

/// Outbound route of the vault. Hostname is `{vault_id}.{environment}.{domain}`.
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "config_defaults::default_proxy_domain")]
    pub domain: LiteralOrEnv<String>,
    #[serde(default = "config_defaults::default_proxy_port")]
    pub port: LiteralOrEnv<u16>,
    #[serde(default)]
    pub scheme: ProxyScheme,
    pub username: LiteralOrEnv<String>,
    pub password: LiteralOrEnv<ConfigSecret>,
    /// Connect to this address instead of resolving the route hostname.
    #[serde(default)]
    pub connect_ip: Option<LiteralOrEnv<IpAddr>>,
    /// PEM file with the root certificate of the route.
    #[serde(default)]
    pub ca_certificate: Option<PathBuf>,
}

/// Payment service provider API access.
#[derive(Debug, Deserialize)]
pub struct PspConfig {
    #[serde(default = "config_defaults::default_psp_api_base")]
    pub api_base: LiteralOrEnv<Url>,
    pub secret_key: LiteralOrEnv<ConfigSecret>,
    /// Recurring price the subscription is created for.
    pub price_id: LiteralOrEnv<String>,
}

/// Per-call timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "config_defaults::default_token_secs")]
    pub token_secs: u64,
    #[serde(default = "config_defaults::default_proxy_secs")]
    pub proxy_secs: u64,
    #[serde(default = "config_defaults::default_psp_secs")]
    pub psp_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        TimeoutsConfig {
            token_secs: config_defaults::default_token_secs(),
            proxy_secs: config_defaults::default_proxy_secs(),
            psp_secs: config_defaults::default_psp_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn token(&self) -> Duration {
        Duration::from_secs(self.token_secs)
    }

    pub fn proxy(&self) -> Duration {
        Duration::from_secs(self.proxy_secs)
    }

    pub fn psp(&self) -> Duration {
        Duration::from_secs(self.psp_secs)
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};
    use url::Url;
    use vault_handoff_types::config::LiteralOrEnv;

    pub const DEFAULT_PORT: u16 = 3001;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    pub const DEFAULT_ENVIRONMENT: &str = "sandbox";
    pub const DEFAULT_TOKEN_URL: &str =
        "https://auth.verygoodsecurity.com/auth/realms/vgs/protocol/openid-connect/token";
    pub const DEFAULT_PROXY_DOMAIN: &str = "verygoodproxy.com";
    pub const DEFAULT_PROXY_PORT: u16 = 8443;
    pub const DEFAULT_PSP_API_BASE: &str = "https://api.stripe.com/";

    /// Returns the default port value with fallback: $PORT env var -> 3001
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    pub fn default_environment() -> LiteralOrEnv<String> {
        LiteralOrEnv::from_literal(DEFAULT_ENVIRONMENT.to_string())
    }

    pub fn default_token_url() -> LiteralOrEnv<Url> {
        LiteralOrEnv::from_literal(parse_constant(DEFAULT_TOKEN_URL))
    }

    pub fn default_proxy_domain() -> LiteralOrEnv<String> {
        LiteralOrEnv::from_literal(DEFAULT_PROXY_DOMAIN.to_string())
    }

    pub fn default_proxy_port() -> LiteralOrEnv<u16> {
        LiteralOrEnv::from_literal(DEFAULT_PROXY_PORT)
    }

    pub fn default_psp_api_base() -> LiteralOrEnv<Url> {
        LiteralOrEnv::from_literal(parse_constant(DEFAULT_PSP_API_BASE))
    }

    pub fn default_token_secs() -> u64 {
        5
    }

    pub fn default_proxy_secs() -> u64 {
        8
    }

    pub fn default_psp_secs() -> u64 {
        5
    }

    fn parse_constant(url: &str) -> Url {
        Url::parse(url).expect("default URLs are valid")
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Failed to read proxy CA certificate at {0}: {1}")]
    CertificateRead(PathBuf, std::io::Error),
    #[error("Invalid PSP API base URL: {0}")]
    PspApiBase(#[source] url::ParseError),
}

impl Config {
    /// Get the port value.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the host value as an IpAddr.
    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn timeouts(&self) -> TimeoutsConfig {
        self.timeouts
    }

    /// Splits the configuration into its vault, PSP and timeout sections.
    pub fn into_parts(self) -> (VaultConfig, PspConfig, TimeoutsConfig) {
        (self.vault, self.psp, self.timeouts)
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by:
    /// 1. `--config <path>` CLI argument
    /// 2. `$CONFIG`
    /// 3. `./config.json`
    ///
    /// `$VAR` references in the file are resolved during deserialization.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

impl ProxyConfig {
    /// Reads the configured CA certificate file, if any.
    pub fn read_ca_certificate(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        match &self.ca_certificate {
            None => Ok(None),
            Some(path) => fs::read(path)
                .map(Some)
                .map_err(|e| ConfigError::CertificateRead(path.clone(), e)),
        }
    }
}
