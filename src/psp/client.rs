//! Direct PSP calls that carry no card data: customer and subscription creation.

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use url::Url;
use vault_handoff_types::flow::CustomerIdentity;
use vault_handoff_types::timestamp::UnixTimestamp;

use crate::psp::{PspCredentials, PspError, send_form};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PspCustomer {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PspSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub current_period_end: Option<UnixTimestamp>,
}

/// A client for the PSP REST API.
///
/// Requests made here go directly to the PSP with bearer authentication. Requests
/// carrying card aliases go through [`crate::psp::PaymentMethodCreator`] instead.
#[derive(Debug)]
pub struct PspClient {
    /// Base URL of the API (e.g. `https://api.stripe.com/`)
    api_base: Url,
    customers_url: Url,
    subscriptions_url: Url,
    payment_methods_url: Url,
    client: Client,
    credentials: PspCredentials,
    price_id: String,
    timeout: Option<Duration>,
}

impl PspClient {
    /// Constructs a new [`PspClient`] from the API base URL.
    ///
    /// Endpoint URLs are resolved relative to the base, which is normalized to end with `/`.
    pub fn try_new(
        api_base: Url,
        credentials: PspCredentials,
        price_id: impl Into<String>,
    ) -> Result<Self, url::ParseError> {
        let mut api_base = api_base;
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }
        let customers_url = api_base.join("./v1/customers")?;
        let subscriptions_url = api_base.join("./v1/subscriptions")?;
        let payment_methods_url = api_base.join("./v1/payment_methods")?;
        Ok(Self {
            api_base,
            customers_url,
            subscriptions_url,
            payment_methods_url,
            client: Client::new(),
            credentials,
            price_id: price_id.into(),
            timeout: None,
        })
    }

    /// Sets a timeout for all future direct requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    pub fn payment_methods_url(&self) -> &Url {
        &self.payment_methods_url
    }

    /// `{api_base}/v1/payment_methods/{id}/attach`
    pub fn attach_url(&self, payment_method_id: &str) -> Url {
        let mut url = self.payment_methods_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(payment_method_id).push("attach");
        }
        url
    }

    pub fn credentials(&self) -> &PspCredentials {
        &self.credentials
    }

    pub fn price_id(&self) -> &str {
        &self.price_id
    }

    /// Sends `POST /v1/customers`.
    #[instrument(name = "psp.customer.create", skip_all, err)]
    pub async fn create_customer(
        &self,
        customer: &CustomerIdentity,
    ) -> Result<PspCustomer, PspError> {
        let form = [
            ("email", customer.email.as_str()),
            ("name", customer.name.as_str()),
        ];
        send_form(
            self.post(&self.customers_url).form(&form),
            "POST /v1/customers",
        )
        .await
    }

    /// Sends `POST /v1/subscriptions` for the configured price, charging `payment_method_id`.
    #[instrument(name = "psp.subscription.create", skip_all, err, fields(customer_id = %customer_id))]
    pub async fn create_subscription(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<PspSubscription, PspError> {
        let form = [
            ("customer", customer_id),
            ("items[0][price]", self.price_id.as_str()),
            ("default_payment_method", payment_method_id),
            ("expand[]", "latest_invoice.payment_intent"),
        ];
        send_form(
            self.post(&self.subscriptions_url).form(&form),
            "POST /v1/subscriptions",
        )
        .await
    }

    fn post(&self, url: &Url) -> RequestBuilder {
        let mut req = self
            .client
            .post(url.clone())
            .bearer_auth(self.credentials.secret_key());
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        req
    }
}
