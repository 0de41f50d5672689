//! Tokenized card references.
//!
//! A [`RawCardReference`] is what arrives on the wire from the field-capture widget: every
//! attribute is optional so that a missing alias surfaces as a [`ValidationError`] rather
//! than a deserialization failure. [`TokenizedCardReference`] is the validated form that
//! the rest of the pipeline consumes.
//!
//! # Example
//!
//! ```
//! use vault_handoff_types::card::{RawCardReference, TokenizedCardReference};
//!
//! let raw: RawCardReference = serde_json::from_str(r#"{
//!     "panAlias": "tok_sandbox_abc",
//!     "cvcAlias": "tok_sandbox_cvc",
//!     "expMonth": 12,
//!     "expYear": "2030",
//!     "last4": "4242"
//! }"#).unwrap();
//! let card = TokenizedCardReference::try_from(raw).unwrap();
//! assert_eq!(card.exp_year(), 2030);
//! ```

use serde::{Deserialize, Serialize};

/// Reasons a card reference or customer identity is rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    /// The field holds what looks like real card data instead of a vault alias.
    #[error("Field {0} must carry a vault alias, not raw card data")]
    RawCardData(&'static str),
    #[error("Expiry month must be between 1 and 12")]
    InvalidExpMonth,
    #[error("Expiry year must be a four-digit year")]
    InvalidExpYear,
    #[error("last4 must be exactly four digits")]
    InvalidLast4,
    #[error("Customer email is malformed")]
    InvalidEmail,
    #[error("Malformed request body: {0}")]
    MalformedBody(String),
}

/// A number that the widget may send either as a JSON number or as a numeric string.
///
/// Any JSON number is accepted here; negative and fractional values fail range checks
/// during validation instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(serde_json::Number),
    Text(String),
}

impl From<u64> for Numeric {
    fn from(value: u64) -> Self {
        Numeric::Number(value.into())
    }
}

impl Numeric {
    fn parse(&self) -> Option<u64> {
        match self {
            Numeric::Number(n) => n.as_u64(),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// A card reference as received from the field-capture widget, prior to validation.
///
/// Field names are camelCase on the wire; the widget's snake_case attribute names
/// (`pan_alias`, `cvc_alias`, `exp_month`, `exp_year`) are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCardReference {
    #[serde(default, alias = "pan_alias")]
    pub pan_alias: Option<String>,
    #[serde(default, alias = "cvc_alias")]
    pub cvc_alias: Option<String>,
    #[serde(default, alias = "exp_month")]
    pub exp_month: Option<Numeric>,
    #[serde(default, alias = "exp_year")]
    pub exp_year: Option<Numeric>,
    #[serde(default)]
    pub last4: Option<String>,
}

/// A validated card reference.
///
/// Holds only vault aliases and display-safe fields. Construction through
/// [`TryFrom<RawCardReference>`] guarantees that neither alias looks like a full card
/// number or CVC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenizedCardReference {
    pan_alias: String,
    cvc_alias: String,
    exp_month: u8,
    exp_year: u16,
    last4: String,
}

impl TokenizedCardReference {
    pub fn pan_alias(&self) -> &str {
        &self.pan_alias
    }

    pub fn cvc_alias(&self) -> &str {
        &self.cvc_alias
    }

    pub fn exp_month(&self) -> u8 {
        self.exp_month
    }

    pub fn exp_year(&self) -> u16 {
        self.exp_year
    }

    pub fn last4(&self) -> &str {
        &self.last4
    }
}

impl TryFrom<RawCardReference> for TokenizedCardReference {
    type Error = ValidationError;

    fn try_from(raw: RawCardReference) -> Result<Self, Self::Error> {
        let pan_alias = required(raw.pan_alias, "panAlias")?;
        let cvc_alias = required(raw.cvc_alias, "cvcAlias")?;
        if looks_like_digits(&pan_alias, 12..=19) {
            return Err(ValidationError::RawCardData("panAlias"));
        }
        if looks_like_digits(&cvc_alias, 3..=4) {
            return Err(ValidationError::RawCardData("cvcAlias"));
        }

        let exp_month = raw
            .exp_month
            .ok_or(ValidationError::MissingField("expMonth"))?
            .parse()
            .filter(|m| (1..=12).contains(m))
            .ok_or(ValidationError::InvalidExpMonth)? as u8;
        let exp_year = raw
            .exp_year
            .ok_or(ValidationError::MissingField("expYear"))?
            .parse()
            .filter(|y| (2000..=2099).contains(y))
            .ok_or(ValidationError::InvalidExpYear)? as u16;

        let last4 = required(raw.last4, "last4")?;
        if last4.len() != 4 || !last4.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidLast4);
        }

        Ok(TokenizedCardReference {
            pan_alias,
            cvc_alias,
            exp_month,
            exp_year,
            last4,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

/// True when `value`, ignoring spaces and dashes, is only digits with a length in `range`.
fn looks_like_digits(value: &str, range: std::ops::RangeInclusive<usize>) -> bool {
    let mut digits = 0usize;
    for c in value.chars() {
        match c {
            '0'..='9' => digits += 1,
            ' ' | '-' => {}
            _ => return false,
        }
    }
    range.contains(&digits)
}
