//! Orchestration payloads.
//!
//! - [`FlowRequest`] - inbound request to run the handoff for one card
//! - [`FlowResult`] - the aggregate returned on success
//! - [`FlowFailure`] - the single structured error returned on failure, naming the stage
//!   that failed and any PSP objects already created
//! - [`VaultInfo`] / [`CollectTokenResponse`] - payloads for the field-capture widget
//!
//! # Example
//!
//! A failure after the customer and payment method were created:
//!
//! ```json
//! {
//!   "errorKind": "PSPError",
//!   "stage": "CreateSubscription",
//!   "message": "PSP rejected POST /v1/subscriptions (402 Payment Required): Your card was declined.",
//!   "partialState": { "customerId": "cus_123", "paymentMethodId": "pm_123" }
//! }
//! ```

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use crate::card::{RawCardReference, TokenizedCardReference, ValidationError};
use crate::timestamp::UnixTimestamp;

/// Name given to the PSP customer when the caller does not supply one.
pub const DEFAULT_CUSTOMER_NAME: &str = "Cardholder";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern")
});

/// The card reference as sent by the widget: either the attributes object itself or
/// wrapped as `{ "attributes": { ... } }`.
///
/// The shape is chosen by the presence of an `attributes` key, so a malformed field
/// inside the wrapper is reported as such.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CardReferenceEnvelope {
    Wrapped { attributes: RawCardReference },
    Flat(RawCardReference),
}

impl<'de> Deserialize<'de> for CardReferenceEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut value = serde_json::Value::deserialize(deserializer)?;
        let attributes = value
            .as_object_mut()
            .and_then(|object| object.remove("attributes"));
        match attributes {
            Some(attributes) => RawCardReference::deserialize(attributes)
                .map(|attributes| CardReferenceEnvelope::Wrapped { attributes })
                .map_err(serde::de::Error::custom),
            None => RawCardReference::deserialize(value)
                .map(CardReferenceEnvelope::Flat)
                .map_err(serde::de::Error::custom),
        }
    }
}

impl CardReferenceEnvelope {
    pub fn into_raw(self) -> RawCardReference {
        match self {
            CardReferenceEnvelope::Wrapped { attributes } => attributes,
            CardReferenceEnvelope::Flat(raw) => raw,
        }
    }
}

/// Inbound request for `POST /api/vgs/process-complete-flow`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRequest {
    #[serde(default, alias = "cardObject")]
    pub tokenized_card_reference: Option<CardReferenceEnvelope>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
}

/// The PSP customer to create for this flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerIdentity {
    pub email: String,
    pub name: String,
}

/// A [`FlowRequest`] that passed boundary validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFlowRequest {
    pub card: TokenizedCardReference,
    pub customer: CustomerIdentity,
}

impl FlowRequest {
    /// Validates the card reference and customer identity.
    ///
    /// The card reference is checked first so a missing alias is reported even when the
    /// email is also absent.
    pub fn validate(self) -> Result<ValidatedFlowRequest, ValidationError> {
        let raw = self
            .tokenized_card_reference
            .ok_or(ValidationError::MissingField("tokenizedCardReference"))?
            .into_raw();
        let card = TokenizedCardReference::try_from(raw)?;

        let email = self
            .customer_email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or(ValidationError::MissingField("customerEmail"))?;
        if !EMAIL.is_match(&email) {
            return Err(ValidationError::InvalidEmail);
        }
        let name = self
            .customer_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_CUSTOMER_NAME.to_string());

        Ok(ValidatedFlowRequest {
            card,
            customer: CustomerIdentity { email, name },
        })
    }
}

/// Display-safe card attributes shown to the caller.
///
/// `last4` and the expiry come from the tokenized reference; `brand` from the PSP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub brand: String,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
}

/// A payment method created at the PSP from aliased card data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodResult {
    pub payment_method_id: String,
    #[serde(flatten)]
    pub card_details: CardDetails,
}

/// Result of a completed orchestration.
///
/// Every field is always serialized, so the shape is identical across successful runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResult {
    pub customer_id: String,
    pub payment_method_id: String,
    pub card_details: CardDetails,
    pub subscription_id: String,
    pub subscription_status: String,
    pub current_period_end: Option<UnixTimestamp>,
}

/// Orchestration stage, as named in failure payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowStage {
    Validate,
    CreateCustomer,
    CreatePaymentMethod,
    CreateSubscription,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStage::Validate => "Validate",
            FlowStage::CreateCustomer => "CreateCustomer",
            FlowStage::CreatePaymentMethod => "CreatePaymentMethod",
            FlowStage::CreateSubscription => "CreateSubscription",
        }
    }
}

impl Display for FlowStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input; nothing was sent upstream.
    #[serde(rename = "ValidationError")]
    Validation,
    /// The vault identity exchange failed.
    #[serde(rename = "AuthError")]
    Auth,
    /// The tunnel through the vault's outbound route could not be established.
    #[serde(rename = "ProxyConnectionError")]
    ProxyConnection,
    /// The PSP rejected the aliased card data.
    #[serde(rename = "CardCreationError")]
    CardCreation,
    /// A PSP call other than card creation failed, possibly after side effects.
    #[serde(rename = "PSPError")]
    Psp,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::ProxyConnection => "ProxyConnectionError",
            ErrorKind::CardCreation => "CardCreationError",
            ErrorKind::Psp => "PSPError",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PSP objects that exist at the time of failure, for out-of-band reconciliation.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialState {
    pub customer_id: Option<String>,
    pub payment_method_id: Option<String>,
}

impl PartialState {
    pub fn is_empty(&self) -> bool {
        self.customer_id.is_none() && self.payment_method_id.is_none()
    }
}

/// The structured error returned when an orchestration fails.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{stage} failed with {error_kind}: {message}")]
pub struct FlowFailure {
    pub error_kind: ErrorKind,
    pub stage: FlowStage,
    pub message: String,
    pub partial_state: Option<PartialState>,
}

impl FlowFailure {
    pub fn new(
        stage: FlowStage,
        error_kind: ErrorKind,
        message: impl Into<String>,
        partial_state: PartialState,
    ) -> Self {
        FlowFailure {
            error_kind,
            stage,
            message: message.into(),
            partial_state: (!partial_state.is_empty()).then_some(partial_state),
        }
    }

    /// A validation failure at the [`FlowStage::Validate`] stage.
    pub fn validation(error: &ValidationError) -> Self {
        FlowFailure::new(
            FlowStage::Validate,
            ErrorKind::Validation,
            error.to_string(),
            PartialState::default(),
        )
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.partial_state.as_ref()?.customer_id.as_deref()
    }

    pub fn payment_method_id(&self) -> Option<&str> {
        self.partial_state.as_ref()?.payment_method_id.as_deref()
    }
}

/// Public routing configuration for the field-capture widget. Carries no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultInfo {
    pub vault_id: String,
    pub environment: String,
}

/// Response of `GET /api/vgs/get-collect-token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectTokenResponse {
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_json() -> serde_json::Value {
        json!({
            "tokenizedCardReference": {
                "panAlias": "tok_abc",
                "cvcAlias": "tok_cvc",
                "expMonth": 12,
                "expYear": 2030,
                "last4": "4242"
            },
            "customerEmail": "a@b.com"
        })
    }

    #[test]
    fn validates_request_and_defaults_name() {
        let request: FlowRequest = serde_json::from_value(request_json()).unwrap();
        let validated = request.validate().unwrap();
        assert_eq!(validated.customer.email, "a@b.com");
        assert_eq!(validated.customer.name, DEFAULT_CUSTOMER_NAME);
        assert_eq!(validated.card.last4(), "4242");
    }

    #[test]
    fn accepts_widget_card_object() {
        let request: FlowRequest = serde_json::from_value(json!({
            "cardObject": {
                "attributes": {
                    "pan_alias": "tok_abc",
                    "cvc_alias": "tok_cvc",
                    "exp_month": 1,
                    "exp_year": 2029,
                    "last4": "0005"
                }
            },
            "customerEmail": "jane@example.com",
            "customerName": "Jane Doe"
        }))
        .unwrap();
        let validated = request.validate().unwrap();
        assert_eq!(validated.card.pan_alias(), "tok_abc");
        assert_eq!(validated.customer.name, "Jane Doe");
    }

    #[test]
    fn reports_field_errors_inside_card_object() {
        let request: FlowRequest = serde_json::from_value(json!({
            "cardObject": {
                "attributes": {
                    "pan_alias": "tok_abc",
                    "cvc_alias": "tok_cvc",
                    "exp_month": -1,
                    "exp_year": 2030,
                    "last4": "4242"
                }
            },
            "customerEmail": "a@b.com"
        }))
        .unwrap();
        assert_eq!(request.validate(), Err(ValidationError::InvalidExpMonth));

        let malformed = serde_json::from_value::<FlowRequest>(json!({
            "cardObject": { "attributes": { "pan_alias": 42 } },
            "customerEmail": "a@b.com"
        }))
        .unwrap_err();
        assert!(malformed.to_string().contains("invalid type"));
    }

    #[test]
    fn rejects_malformed_email() {
        let mut value = request_json();
        value["customerEmail"] = json!("not-an-email");
        let request: FlowRequest = serde_json::from_value(value).unwrap();
        assert_eq!(request.validate(), Err(ValidationError::InvalidEmail));
    }

    #[test]
    fn rejects_missing_reference() {
        let request = FlowRequest {
            customer_email: Some("a@b.com".to_string()),
            ..Default::default()
        };
        assert_eq!(
            request.validate(),
            Err(ValidationError::MissingField("tokenizedCardReference"))
        );
    }

    #[test]
    fn failure_serializes_stage_and_partial_state() {
        let failure = FlowFailure::new(
            FlowStage::CreateSubscription,
            ErrorKind::Psp,
            "declined",
            PartialState {
                customer_id: Some("cus_1".to_string()),
                payment_method_id: Some("pm_1".to_string()),
            },
        );
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            value,
            json!({
                "errorKind": "PSPError",
                "stage": "CreateSubscription",
                "message": "declined",
                "partialState": { "customerId": "cus_1", "paymentMethodId": "pm_1" }
            })
        );
    }

    #[test]
    fn failure_omits_empty_partial_state() {
        let failure = FlowFailure::validation(&ValidationError::MissingField("panAlias"));
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["errorKind"], "ValidationError");
        assert_eq!(value["stage"], "Validate");
        assert!(value.get("partialState").is_none());
    }

    #[test]
    fn result_always_carries_period_end_field() {
        let result = FlowResult {
            customer_id: "cus_1".to_string(),
            payment_method_id: "pm_1".to_string(),
            card_details: CardDetails {
                brand: "visa".to_string(),
                last4: "4242".to_string(),
                exp_month: 12,
                exp_year: 2030,
            },
            subscription_id: "sub_1".to_string(),
            subscription_status: "active".to_string(),
            current_period_end: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "cardDetails",
                "currentPeriodEnd",
                "customerId",
                "paymentMethodId",
                "subscriptionId",
                "subscriptionStatus"
            ]
        );
    }
}
