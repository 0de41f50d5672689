//! Flow Orchestrator.
//!
//! Drives one card handoff from request to result:
//!
//! ```text
//! Validated -> CustomerCreated -> PaymentMethodCreated -> SubscriptionCreated -> Completed
//! ```
//!
//! Any step may fail, which ends the flow with a [`FlowFailure`] naming the stage and the
//! PSP objects created so far. Nothing is retried or rolled back.
//!
//! The payment method step fetches a fresh vault credential, builds a fresh
//! [`ProxyTunnel`] with it, and sends the aliased card data through that tunnel. Customer
//! and subscription calls go directly to the PSP.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use vault_handoff_types::flow::{
    CollectTokenResponse, ErrorKind, FlowFailure, FlowRequest, FlowResult, FlowStage,
    PartialState, PaymentMethodResult, ValidatedFlowRequest, VaultInfo,
};

use crate::config::{Config, ConfigError};
use crate::psp::{PaymentMethodCreator, PspClient, PspCredentials, PspSubscription};
use crate::vault::{AuthError, AuthTokenClient, ProxyRoute, ProxyTunnel, ServiceCredentials};

/// Asynchronous interface of the card handoff, as used by the HTTP handlers.
pub trait CardHandoff {
    /// Runs the complete handoff for one tokenized card reference.
    fn process(
        &self,
        request: FlowRequest,
    ) -> impl Future<Output = Result<FlowResult, FlowFailure>> + Send;

    /// Issues a short-lived vault access token for the field-capture widget.
    fn collect_token(
        &self,
    ) -> impl Future<Output = Result<CollectTokenResponse, AuthError>> + Send;

    /// Public routing configuration of the vault.
    fn vault_info(&self) -> VaultInfo;
}

impl<T: CardHandoff> CardHandoff for Arc<T> {
    fn process(
        &self,
        request: FlowRequest,
    ) -> impl Future<Output = Result<FlowResult, FlowFailure>> + Send {
        self.as_ref().process(request)
    }

    fn collect_token(
        &self,
    ) -> impl Future<Output = Result<CollectTokenResponse, AuthError>> + Send {
        self.as_ref().collect_token()
    }

    fn vault_info(&self) -> VaultInfo {
        self.as_ref().vault_info()
    }
}

/// Progress of a single orchestration. Failure is the `Err` side of each transition and
/// completion is the `Break` side.
enum FlowState {
    Validated(ValidatedFlowRequest),
    CustomerCreated {
        request: ValidatedFlowRequest,
        customer_id: String,
    },
    PaymentMethodCreated {
        customer_id: String,
        payment_method: PaymentMethodResult,
    },
    SubscriptionCreated {
        customer_id: String,
        payment_method: PaymentMethodResult,
        subscription: PspSubscription,
    },
}

/// The card handoff, wired to a vault and a PSP.
///
/// Holds only read-only configuration. Credentials and tunnels are created per call.
#[derive(Debug)]
pub struct FlowOrchestrator {
    auth: AuthTokenClient,
    service_credentials: ServiceCredentials,
    route: ProxyRoute,
    psp: PspClient,
    proxy_timeout: Duration,
}

impl FlowOrchestrator {
    pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(8);

    pub fn new(
        auth: AuthTokenClient,
        service_credentials: ServiceCredentials,
        route: ProxyRoute,
        psp: PspClient,
    ) -> Self {
        Self {
            auth,
            service_credentials,
            route,
            psp,
            proxy_timeout: Self::DEFAULT_PROXY_TIMEOUT,
        }
    }

    /// Sets the timeout for each request sent through the tunnel.
    pub fn with_proxy_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_timeout = timeout;
        self
    }

    /// Builds the orchestrator from loaded configuration.
    pub fn try_from_config(config: Config) -> Result<Self, ConfigError> {
        let (vault, psp, timeouts) = config.into_parts();

        let ca_certificate = vault.proxy.read_ca_certificate()?;
        let proxy = vault.proxy;
        let mut route = ProxyRoute::new(
            vault.vault_id.into_inner(),
            vault.environment.into_inner(),
            proxy.username.into_inner(),
            proxy.password.into_inner().into_inner(),
        )
        .with_domain(proxy.domain.into_inner())
        .with_port(proxy.port.into_inner())
        .with_scheme(proxy.scheme);
        if let Some(ip) = proxy.connect_ip {
            route = route.with_connect_ip(ip.into_inner());
        }
        if let Some(pem) = ca_certificate {
            route = route.with_ca_certificate(pem);
        }

        let auth = AuthTokenClient::new(vault.token_url.into_inner()).with_timeout(timeouts.token());
        let service_credentials = ServiceCredentials::new(
            vault.client_id.into_inner(),
            vault.client_secret.into_inner().into_inner(),
        );
        let psp = PspClient::try_new(
            psp.api_base.into_inner(),
            PspCredentials::new(psp.secret_key.into_inner().into_inner()),
            psp.price_id.into_inner(),
        )
        .map_err(ConfigError::PspApiBase)?
        .with_timeout(timeouts.psp());

        Ok(Self::new(auth, service_credentials, route, psp).with_proxy_timeout(timeouts.proxy()))
    }

    /// Runs one orchestration.
    #[instrument(
        name = "handoff.flow",
        skip_all,
        fields(
            customer_id = tracing::field::Empty,
            payment_method_id = tracing::field::Empty
        )
    )]
    pub async fn run(&self, request: FlowRequest) -> Result<FlowResult, FlowFailure> {
        let validated = request.validate().map_err(|e| {
            tracing::warn!(stage = %FlowStage::Validate, error = %e, "Request rejected");
            FlowFailure::validation(&e)
        })?;

        let mut state = FlowState::Validated(validated);
        loop {
            let step = self.advance(state).await.inspect_err(|failure| {
                tracing::warn!(
                    stage = %failure.stage,
                    error_kind = %failure.error_kind,
                    message = %failure.message,
                    "Card handoff failed"
                );
                if let Some(partial) = &failure.partial_state {
                    tracing::warn!(
                        customer_id = ?partial.customer_id,
                        payment_method_id = ?partial.payment_method_id,
                        "PSP objects left behind; reconcile out of band"
                    );
                }
            })?;
            state = match step {
                ControlFlow::Continue(next) => next,
                ControlFlow::Break(result) => {
                    tracing::info!(
                        subscription_status = %result.subscription_status,
                        "Card handoff completed"
                    );
                    return Ok(result);
                }
            };
        }
    }

    async fn advance(
        &self,
        state: FlowState,
    ) -> Result<ControlFlow<FlowResult, FlowState>, FlowFailure> {
        match state {
            FlowState::Validated(request) => {
                let customer = self
                    .psp
                    .create_customer(&request.customer)
                    .await
                    .map_err(|e| {
                        FlowFailure::new(
                            FlowStage::CreateCustomer,
                            ErrorKind::Psp,
                            e.to_string(),
                            PartialState::default(),
                        )
                    })?;
                tracing::Span::current().record("customer_id", customer.id.as_str());
                tracing::info!(stage = %FlowStage::CreateCustomer, customer_id = %customer.id, "Customer created");
                Ok(ControlFlow::Continue(FlowState::CustomerCreated {
                    request,
                    customer_id: customer.id,
                }))
            }
            FlowState::CustomerCreated {
                request,
                customer_id,
            } => {
                let payment_method = self
                    .create_payment_method(&request, &customer_id)
                    .await?;
                tracing::Span::current().record(
                    "payment_method_id",
                    payment_method.payment_method_id.as_str(),
                );
                Ok(ControlFlow::Continue(FlowState::PaymentMethodCreated {
                    customer_id,
                    payment_method,
                }))
            }
            FlowState::PaymentMethodCreated {
                customer_id,
                payment_method,
            } => {
                let subscription = self
                    .psp
                    .create_subscription(&customer_id, &payment_method.payment_method_id)
                    .await
                    .map_err(|e| {
                        FlowFailure::new(
                            FlowStage::CreateSubscription,
                            ErrorKind::Psp,
                            e.to_string(),
                            PartialState {
                                customer_id: Some(customer_id.clone()),
                                payment_method_id: Some(payment_method.payment_method_id.clone()),
                            },
                        )
                    })?;
                tracing::info!(
                    stage = %FlowStage::CreateSubscription,
                    subscription_id = %subscription.id,
                    "Subscription created"
                );
                Ok(ControlFlow::Continue(FlowState::SubscriptionCreated {
                    customer_id,
                    payment_method,
                    subscription,
                }))
            }
            FlowState::SubscriptionCreated {
                customer_id,
                payment_method,
                subscription,
            } => Ok(ControlFlow::Break(FlowResult {
                customer_id,
                payment_method_id: payment_method.payment_method_id,
                card_details: payment_method.card_details,
                subscription_id: subscription.id,
                subscription_status: subscription.status,
                current_period_end: subscription.current_period_end,
            })),
        }
    }

    /// Credential, tunnel, then create and attach through the tunnel.
    async fn create_payment_method(
        &self,
        request: &ValidatedFlowRequest,
        customer_id: &str,
    ) -> Result<PaymentMethodResult, FlowFailure> {
        let stage = FlowStage::CreatePaymentMethod;
        let partial = |payment_method_id: Option<&str>| PartialState {
            customer_id: Some(customer_id.to_string()),
            payment_method_id: payment_method_id.map(str::to_string),
        };

        let credential = self
            .auth
            .fetch(&self.service_credentials)
            .await
            .map_err(|e| {
                FlowFailure::new(
                    stage,
                    e.kind(),
                    format!("Vault identity exchange failed: {e}"),
                    partial(None),
                )
            })?;
        let tunnel = ProxyTunnel::build(
            &self.route,
            &credential,
            self.psp.credentials(),
            self.proxy_timeout,
        )
        .map_err(|e| FlowFailure::new(stage, e.kind(), e.to_string(), partial(None)))?;

        let payment_method = PaymentMethodCreator::new(&tunnel, &self.psp)
            .create(&request.card, Some(customer_id))
            .await
            .map_err(|e| {
                FlowFailure::new(stage, e.kind(), e.to_string(), partial(e.payment_method_id()))
            })?;
        tracing::info!(
            stage = %stage,
            payment_method_id = %payment_method.payment_method_id,
            "Payment method created and attached"
        );
        Ok(payment_method)
    }

    /// Fetches a vault access token for the field-capture widget.
    #[instrument(name = "handoff.collect_token", skip_all, err)]
    pub async fn issue_collect_token(&self) -> Result<CollectTokenResponse, AuthError> {
        let credential = self.auth.fetch(&self.service_credentials).await?;
        Ok(CollectTokenResponse {
            access_token: credential.access_token().to_string(),
        })
    }
}

impl CardHandoff for FlowOrchestrator {
    async fn process(&self, request: FlowRequest) -> Result<FlowResult, FlowFailure> {
        self.run(request).await
    }

    async fn collect_token(&self) -> Result<CollectTokenResponse, AuthError> {
        self.issue_collect_token().await
    }

    fn vault_info(&self) -> VaultInfo {
        self.route.vault_info()
    }
}
