//! Payment service provider REST access.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Direct calls: customer and subscription creation |
//! | [`payment_method`] | Payment method creation and attach, sent through the vault tunnel |
//!
//! The PSP speaks form-encoded requests and JSON responses. Failed calls return an
//! `{"error": {"message": ...}}` body; only that message is kept on [`PspError`].

pub mod client;
pub mod payment_method;

pub use client::{PspClient, PspCustomer, PspSubscription};
pub use payment_method::{PaymentMethodCreator, PaymentMethodError};

use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// The PSP secret API key.
#[derive(Debug)]
pub struct PspCredentials {
    secret_key: SecretString,
}

impl PspCredentials {
    pub fn new(secret_key: SecretString) -> Self {
        Self { secret_key }
    }

    pub(crate) fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }

    /// True when `candidate` is the PSP secret key.
    pub fn matches(&self, candidate: &str) -> bool {
        !candidate.is_empty() && candidate == self.secret_key.expose_secret()
    }
}

/// Errors that can occur while calling the PSP.
#[derive(Debug, thiserror::Error)]
pub enum PspError {
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("PSP rejected {context} ({status}){}", detail(.message))]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        message: Option<String>,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl PspError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PspError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The PSP-provided error message, if the PSP returned one.
    pub fn message(&self) -> Option<&str> {
        match self {
            PspError::HttpStatus { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// True when no usable response was received: connect failures and timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(self, PspError::Http { .. })
    }
}

fn detail(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Sends a prepared PSP request and maps the response.
///
/// `context` is a human-readable identifier used in logs and error messages
/// (e.g. `"POST /v1/customers"`).
pub(crate) async fn send_form<R>(request: RequestBuilder, context: &'static str) -> Result<R, PspError>
where
    R: DeserializeOwned,
{
    let http_response = request
        .send()
        .await
        .map_err(|e| PspError::Http { context, source: e.without_url() })?;

    let status = http_response.status();
    if status.is_success() {
        return http_response
            .json::<R>()
            .await
            .map_err(|e| PspError::JsonDeserialization { context, source: e.without_url() });
    }

    let body = http_response
        .text()
        .await
        .map_err(|e| PspError::ResponseBodyRead { context, source: e.without_url() })?;
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|body| body.error.message);
    tracing::warn!(
        context,
        %status,
        psp_message = message.as_deref().unwrap_or("<none>"),
        "PSP call failed"
    );
    Err(PspError::HttpStatus {
        context,
        status,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_match_only_exact_key() {
        let credentials = PspCredentials::new(SecretString::from("sk_test_123".to_string()));
        assert!(credentials.matches("sk_test_123"));
        assert!(!credentials.matches("sk_test_1234"));
        assert!(!credentials.matches(""));
    }

    #[test]
    fn test_status_error_display_carries_psp_message_only() {
        let err = PspError::HttpStatus {
            context: "POST /v1/subscriptions",
            status: StatusCode::PAYMENT_REQUIRED,
            message: Some("Your card was declined.".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "PSP rejected POST /v1/subscriptions (402 Payment Required): Your card was declined."
        );
        let bare = PspError::HttpStatus {
            context: "POST /v1/customers",
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: None,
        };
        assert_eq!(
            bare.to_string(),
            "PSP rejected POST /v1/customers (500 Internal Server Error)"
        );
    }
}
