//! Per-request identifiers.
//!
//! [`RequestIdLayer`] assigns every inbound request a UUIDv7 [`RequestId`], stored in the
//! request extensions. [`RequestSpan`] opens the HTTP tracing span with that id, so every
//! event logged while handling the request carries it.

use axum::http::Request;
use std::fmt::{Display, Formatter};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tower_http::trace::MakeSpan;
use tracing::Span;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Clone, Debug)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for RequestIdService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let request_id = Uuid::now_v7().to_string();
        req.extensions_mut().insert(RequestId(request_id));
        self.inner.call(req)
    }
}

/// Opens the `http.request` span for a request, tagged with its [`RequestId`].
#[derive(Clone, Debug, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.as_str())
            .unwrap_or("-");
        tracing::info_span!(
            "http.request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Response;
    use std::convert::Infallible;
    use tower::{ServiceExt, service_fn};

    #[tokio::test]
    async fn test_assigns_distinct_request_ids() {
        let service = RequestIdLayer.layer(service_fn(|req: Request<()>| async move {
            let id = req.extensions().get::<RequestId>().cloned();
            Ok::<_, Infallible>(Response::new(id))
        }));

        let first = service
            .clone()
            .oneshot(Request::new(()))
            .await
            .unwrap()
            .into_body()
            .unwrap();
        let second = service
            .oneshot(Request::new(()))
            .await
            .unwrap()
            .into_body()
            .unwrap();
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first.0).is_ok());
    }
}
