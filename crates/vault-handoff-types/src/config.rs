//! Environment variable resolution for configuration values.
//!
//! The [`LiteralOrEnv`] wrapper lets a configuration value be given either literally or
//! as a reference to an environment variable:
//!
//! ```json
//! {
//!   "vault_id": "tntabc123",                 // Literal value
//!   "client_secret": "$VGS_CLIENT_SECRET",   // Simple env var
//!   "secret_key": "${STRIPE_SECRET_KEY}"     // Braced env var
//! }
//! ```
//!
//! Vault and PSP credentials stay out of the configuration file this way and are
//! resolved once at startup.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// Supports both literal values and environment variable references:
/// - Literal: `"sandbox"`
/// - Simple env var: `"$VGS_ENVIRONMENT"`
/// - Braced env var: `"${VGS_ENVIRONMENT}"`
///
/// The wrapper implements `Deref` to provide transparent access to the inner type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    /// Get a reference to the inner value
    pub fn inner(&self) -> &T {
        &self.0
    }

    /// Consume the wrapper and return the inner value
    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name if the string matches `$VAR` or `${VAR}` syntax.
    fn parse_env_var_syntax(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            Some(braced)
        } else if let Some(var_name) = s.strip_prefix('$') {
            let valid = !var_name.is_empty()
                && var_name.chars().all(|c| c.is_alphanumeric() || c == '_');
            valid.then_some(var_name)
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
            Bool(bool),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Number(n) => n.to_string(),
            Raw::Bool(b) => b.to_string(),
        };

        let value = match Self::parse_env_var_syntax(&s) {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?,
            None => s,
        };

        // Parse errors can echo the value, which may be a secret; keep them generic.
        let parsed = value.parse::<T>().map_err(|e| {
            serde::de::Error::custom(format!("Failed to parse configuration value: {}", e))
        })?;

        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_env_var_syntax() {
        assert_eq!(
            LiteralOrEnv::<String>::parse_env_var_syntax("$VGS_VAULT_ID"),
            Some("VGS_VAULT_ID")
        );
        assert_eq!(
            LiteralOrEnv::<String>::parse_env_var_syntax("${VGS_VAULT_ID}"),
            Some("VGS_VAULT_ID")
        );
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("$"), None);
        assert_eq!(
            LiteralOrEnv::<String>::parse_env_var_syntax("$not-a-var"),
            None
        );
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("sandbox"), None);
    }

    #[test]
    fn deserializes_literal_values() {
        let port: LiteralOrEnv<u16> = serde_json::from_str("8443").unwrap();
        assert_eq!(*port, 8443);
        let env: LiteralOrEnv<String> = serde_json::from_str("\"sandbox\"").unwrap();
        assert_eq!(env.inner(), "sandbox");
    }

    #[test]
    fn reports_missing_env_var() {
        let result: Result<LiteralOrEnv<String>, _> =
            serde_json::from_str("\"$VAULT_HANDOFF_SURELY_UNSET_VARIABLE\"");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("VAULT_HANDOFF_SURELY_UNSET_VARIABLE"));
    }

    #[test]
    fn resolves_present_env_var() {
        // PATH is set in every test environment we run in.
        let path: LiteralOrEnv<String> = serde_json::from_str("\"${PATH}\"").unwrap();
        assert!(!path.is_empty());
    }
}
