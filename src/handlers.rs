//! HTTP endpoints of the vault handoff server.
//!
//! - `POST /api/vgs/process-complete-flow` runs the card handoff and returns a
//!   [`FlowResult`] or a [`FlowFailure`]
//! - `GET /api/vgs/config` returns the public vault routing configuration
//! - `GET /api/vgs/get-collect-token` issues a vault access token for the field-capture widget
//! - `GET /health` reports liveness
//!
//! Handlers are generic over [`CardHandoff`], so tests can drive them with a stub.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::instrument;
use vault_handoff_types::card::ValidationError;
use vault_handoff_types::flow::{ErrorKind, FlowFailure, FlowRequest};

use crate::orchestrator::CardHandoff;

/// Routes of the server, with the handoff implementation as router state.
pub fn routes<A>() -> Router<A>
where
    A: CardHandoff + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(get_health))
        .route("/api/vgs/config", get(get_config::<A>))
        .route("/api/vgs/get-collect-token", get(get_collect_token::<A>))
        .route(
            "/api/vgs/process-complete-flow",
            post(post_process_complete_flow::<A>),
        )
}

/// HTTP status for a failure of the given kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::CardCreation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Auth | ErrorKind::ProxyConnection | ErrorKind::Psp => StatusCode::BAD_GATEWAY,
    }
}

/// Error body for endpoints outside the card handoff.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_kind: ErrorKind,
    message: &'static str,
}

/// `GET /health`: liveness, with the current time as an ISO-8601 UTC timestamp.
#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

/// `GET /api/vgs/config`: vault id and environment for the field-capture widget.
#[instrument(skip_all)]
pub async fn get_config<A: CardHandoff>(State(handoff): State<A>) -> impl IntoResponse {
    Json(handoff.vault_info())
}

/// `GET /api/vgs/get-collect-token`: a fresh vault access token.
#[instrument(skip_all)]
pub async fn get_collect_token<A: CardHandoff>(State(handoff): State<A>) -> Response {
    match handoff.collect_token().await {
        Ok(token) => (StatusCode::OK, Json(token)).into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "Collect token exchange failed");
            (
                status_for(error.kind()),
                Json(ErrorResponse {
                    error_kind: error.kind(),
                    message: "Failed to get token",
                }),
            )
                .into_response()
        }
    }
}

/// `POST /api/vgs/process-complete-flow`: runs the card handoff.
///
/// A body that is not valid JSON for [`FlowRequest`] is reported as a validation
/// failure, in the same shape as any other [`FlowFailure`].
#[instrument(skip_all)]
pub async fn post_process_complete_flow<A: CardHandoff>(
    State(handoff): State<A>,
    body: Result<Json<FlowRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(rejection = %rejection.body_text(), "Malformed request body");
            let failure =
                FlowFailure::validation(&ValidationError::MalformedBody(rejection.body_text()));
            return (StatusCode::BAD_REQUEST, Json(failure)).into_response();
        }
    };

    match handoff.process(request).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(failure) => (status_for(failure.error_kind), Json(failure)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::AuthError;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tower::ServiceExt;
    use vault_handoff_types::flow::{
        CardDetails, CollectTokenResponse, FlowResult, FlowStage, PartialState, VaultInfo,
    };

    #[derive(Clone)]
    struct StubHandoff {
        outcome: Result<FlowResult, FlowFailure>,
    }

    impl CardHandoff for StubHandoff {
        async fn process(&self, request: FlowRequest) -> Result<FlowResult, FlowFailure> {
            request.validate().map_err(|e| FlowFailure::validation(&e))?;
            self.outcome.clone()
        }

        async fn collect_token(&self) -> Result<CollectTokenResponse, AuthError> {
            Err(AuthError::MissingCredential("client_secret"))
        }

        fn vault_info(&self) -> VaultInfo {
            VaultInfo {
                vault_id: "tntest".to_string(),
                environment: "sandbox".to_string(),
            }
        }
    }

    fn success() -> FlowResult {
        FlowResult {
            customer_id: "cus_123".to_string(),
            payment_method_id: "pm_123".to_string(),
            card_details: CardDetails {
                brand: "visa".to_string(),
                last4: "4242".to_string(),
                exp_month: 12,
                exp_year: 2030,
            },
            subscription_id: "sub_123".to_string(),
            subscription_status: "active".to_string(),
            current_period_end: None,
        }
    }

    fn app(outcome: Result<FlowResult, FlowFailure>) -> Router {
        routes().with_state(StubHandoff { outcome })
    }

    const VALID_BODY: &str = r#"{
        "tokenizedCardReference": {
            "panAlias": "tok_abc",
            "cvcAlias": "tok_cvc",
            "expMonth": 12,
            "expYear": 2030,
            "last4": "4242"
        },
        "customerEmail": "a@b.com"
    }"#;

    async fn post_flow(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::post("/api/vgs/process-complete-flow")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::CardCreation),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(ErrorKind::Auth), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(ErrorKind::ProxyConnection),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(ErrorKind::Psp), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_flow_success() {
        let (status, body) = post_flow(app(Ok(success())), VALID_BODY).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["customerId"], "cus_123");
        assert_eq!(body["subscriptionStatus"], "active");
        assert!(body["currentPeriodEnd"].is_null());
    }

    #[tokio::test]
    async fn test_flow_failure_carries_stage_and_partial_state() {
        let failure = FlowFailure::new(
            FlowStage::CreateSubscription,
            ErrorKind::Psp,
            "declined",
            PartialState {
                customer_id: Some("cus_123".to_string()),
                payment_method_id: Some("pm_123".to_string()),
            },
        );
        let (status, body) = post_flow(app(Err(failure)), VALID_BODY).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["errorKind"], "PSPError");
        assert_eq!(body["stage"], "CreateSubscription");
        assert_eq!(body["partialState"]["paymentMethodId"], "pm_123");
    }

    #[tokio::test]
    async fn test_card_creation_failure_is_unprocessable() {
        let failure = FlowFailure::new(
            FlowStage::CreatePaymentMethod,
            ErrorKind::CardCreation,
            "rejected",
            PartialState {
                customer_id: Some("cus_123".to_string()),
                payment_method_id: None,
            },
        );
        let (status, body) = post_flow(app(Err(failure)), VALID_BODY).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errorKind"], "CardCreationError");
    }

    #[tokio::test]
    async fn test_missing_alias_is_bad_request() {
        let body = r#"{"tokenizedCardReference":{"cvcAlias":"tok_cvc","expMonth":1,"expYear":2030,"last4":"4242"},"customerEmail":"a@b.com"}"#;
        let (status, body) = post_flow(app(Ok(success())), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorKind"], "ValidationError");
        assert_eq!(body["stage"], "Validate");
    }

    #[tokio::test]
    async fn test_malformed_json_is_validation_error() {
        let (status, body) = post_flow(app(Ok(success())), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorKind"], "ValidationError");
        assert_eq!(body["stage"], "Validate");
        assert!(body.get("partialState").is_none());
    }

    #[tokio::test]
    async fn test_config_and_health() {
        let (status, body) = get_json(app(Ok(success())), "/api/vgs/config").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vaultId"], "tntest");
        assert_eq!(body["environment"], "sandbox");

        let (status, body) = get_json(app(Ok(success())), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_collect_token_failure_is_bad_gateway() {
        let (status, body) = get_json(app(Ok(success())), "/api/vgs/get-collect-token").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["errorKind"], "AuthError");
    }
}
