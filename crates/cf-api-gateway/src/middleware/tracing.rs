//! Per-request tracing span and request id.
//!
//! Outermost layer. Each request gets an `api_request` span carrying the
//! method, path and a request id; the id is taken from `x-request-id` when the
//! client sent a usable one, otherwise generated as a UUID v7, and is echoed
//! back in the response.

use crate::middleware::metrics::{AdmissionMetrics, RequestTimer};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    response::Response,
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, info_span, Instrument, Span};
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Longest client-supplied request id that is propagated as is
const MAX_REQUEST_ID_LEN: usize = 128;

/// Request id stored in request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Tracing layer that creates spans for each request and records latency
#[derive(Clone)]
pub struct TracingLayer {
    metrics: Arc<AdmissionMetrics>,
}

impl TracingLayer {
    pub fn new(metrics: Arc<AdmissionMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService {
            inner,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Tracing service
#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
    metrics: Arc<AdmissionMetrics>,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let timer = RequestTimer::new(Arc::clone(&self.metrics));

        let request_id = extract_request_id(&req).unwrap_or_else(|| Uuid::now_v7().to_string());
        req.extensions_mut().insert(RequestId(request_id.clone()));

        let span = info_span!(
            "api_request",
            http.method = %req.method(),
            http.target = %req.uri().path(),
            request_id = %request_id,
            http.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        );

        Box::pin(
            async move {
                let mut result = inner.call(req).await;
                let latency_ms = timer.finish();

                match &mut result {
                    Ok(response) => {
                        let status = response.status();
                        let span = Span::current();
                        span.record("http.status_code", status.as_u16());
                        span.record(
                            "otel.status_code",
                            if status.is_success() { "OK" } else { "ERROR" },
                        );
                        if let Ok(value) = HeaderValue::from_str(&request_id) {
                            response
                                .headers_mut()
                                .insert(REQUEST_ID_HEADER.clone(), value);
                        }
                        debug!(status = status.as_u16(), latency_ms = latency_ms, "Request completed");
                    }
                    Err(_) => {
                        Span::current().record("otel.status_code", "ERROR");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

/// Client-supplied request id, if printable and of sane length
fn extract_request_id<B>(req: &Request<B>) -> Option<String> {
    let value = req.headers().get(&REQUEST_ID_HEADER)?.to_str().ok()?;
    let value = value.trim();
    if value.is_empty() || value.len() > MAX_REQUEST_ID_LEN {
        return None;
    }
    Some(value.to_string())
}
