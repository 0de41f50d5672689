//! PSP Payment Method Creator.
//!
//! Creates a payment method from a [`TokenizedCardReference`] and optionally attaches it
//! to a customer. Both calls carry aliases and go through the [`ProxyTunnel`], where the
//! vault's outbound route substitutes the real card data. The PSP is authenticated with
//! HTTP basic auth (`secret_key:`), separate from the proxy credentials of the route.

use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::instrument;
use url::Url;
use vault_handoff_types::card::TokenizedCardReference;
use vault_handoff_types::flow::{CardDetails, ErrorKind, PaymentMethodResult};

use crate::psp::{PspClient, PspError, send_form};
use crate::vault::tunnel::ProxyTunnel;

#[derive(Deserialize)]
struct PspPaymentMethod {
    id: String,
    #[serde(default)]
    card: Option<PspCard>,
}

#[derive(Deserialize)]
struct PspCard {
    #[serde(default)]
    brand: Option<String>,
}

/// Errors that can occur while creating or attaching a payment method.
#[derive(Debug, thiserror::Error)]
pub enum PaymentMethodError {
    #[error("Vault proxy route unavailable: {0}")]
    Proxy(#[source] PspError),
    #[error("PSP rejected the aliased card data: {0}")]
    CardCreation(#[source] PspError),
    #[error("Payment method {payment_method_id} was created but could not be attached: {source}")]
    Attach {
        payment_method_id: String,
        #[source]
        source: PspError,
    },
}

impl PaymentMethodError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentMethodError::Proxy(_) => ErrorKind::ProxyConnection,
            PaymentMethodError::CardCreation(_) => ErrorKind::CardCreation,
            PaymentMethodError::Attach { .. } => ErrorKind::Psp,
        }
    }

    /// Id of the payment method left unattached, if creation got that far.
    pub fn payment_method_id(&self) -> Option<&str> {
        match self {
            PaymentMethodError::Attach {
                payment_method_id, ..
            } => Some(payment_method_id),
            _ => None,
        }
    }
}

/// No response, or the route itself refused the proxy credentials.
fn is_route_failure(error: &PspError) -> bool {
    error.is_transport() || error.status() == Some(StatusCode::PROXY_AUTHENTICATION_REQUIRED)
}

/// Issues payment method calls through a [`ProxyTunnel`].
pub struct PaymentMethodCreator<'a> {
    tunnel: &'a ProxyTunnel,
    psp: &'a PspClient,
}

impl<'a> PaymentMethodCreator<'a> {
    pub fn new(tunnel: &'a ProxyTunnel, psp: &'a PspClient) -> Self {
        Self { tunnel, psp }
    }

    /// Creates a payment method from aliased card data, attaching it to `customer_id`
    /// when one is given.
    ///
    /// `brand` comes from the PSP; `last4` and the expiry come from `card`.
    #[instrument(
        name = "psp.payment_method.create",
        skip_all,
        err,
        fields(hostname = %self.tunnel.hostname(), attach = customer_id.is_some())
    )]
    pub async fn create(
        &self,
        card: &TokenizedCardReference,
        customer_id: Option<&str>,
    ) -> Result<PaymentMethodResult, PaymentMethodError> {
        let exp_month = card.exp_month().to_string();
        let exp_year = card.exp_year().to_string();
        let form = [
            ("type", "card"),
            ("card[number]", card.pan_alias()),
            ("card[cvc]", card.cvc_alias()),
            ("card[exp_month]", exp_month.as_str()),
            ("card[exp_year]", exp_year.as_str()),
        ];
        let created: PspPaymentMethod = send_form(
            self.post(self.psp.payment_methods_url().clone()).form(&form),
            "POST /v1/payment_methods",
        )
        .await
        .map_err(|e| {
            if is_route_failure(&e) {
                PaymentMethodError::Proxy(e)
            } else {
                PaymentMethodError::CardCreation(e)
            }
        })?;
        tracing::info!(payment_method_id = %created.id, "Payment method created");

        if let Some(customer_id) = customer_id {
            send_form::<PspPaymentMethod>(
                self.post(self.psp.attach_url(&created.id))
                    .form(&[("customer", customer_id)]),
                "POST /v1/payment_methods/:id/attach",
            )
            .await
            .map_err(|source| PaymentMethodError::Attach {
                payment_method_id: created.id.clone(),
                source,
            })?;
            tracing::info!(payment_method_id = %created.id, customer_id, "Payment method attached");
        }

        let brand = created
            .card
            .and_then(|card| card.brand)
            .unwrap_or_else(|| "unknown".to_string());
        Ok(PaymentMethodResult {
            payment_method_id: created.id,
            card_details: CardDetails {
                brand,
                last4: card.last4().to_string(),
                exp_month: card.exp_month(),
                exp_year: card.exp_year(),
            },
        })
    }

    fn post(&self, url: Url) -> RequestBuilder {
        self.tunnel
            .client()
            .post(url)
            .basic_auth(self.psp.credentials().secret_key(), None::<&str>)
    }
}
