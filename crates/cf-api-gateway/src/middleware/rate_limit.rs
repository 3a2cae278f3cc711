//! Rate limiting middleware.
//!
//! First stage of the admission chain. Keys on the [`ClientAddr`] resolved by
//! the client IP layer, falling back to the socket peer and finally to the
//! shared `"unknown"` bucket.

use crate::domain::error::Rejection;
use crate::domain::limiter::RateLimiter;
use crate::middleware::client_ip::ClientAddr;
use crate::middleware::metrics::AdmissionMetrics;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::warn;

/// Rate limit layer
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    metrics: Arc<AdmissionMetrics>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>, metrics: Arc<AdmissionMetrics>) -> Self {
        Self { limiter, metrics }
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Rate limit service
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    metrics: Arc<AdmissionMetrics>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = Arc::clone(&self.limiter);
        let metrics = Arc::clone(&self.metrics);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let key = rate_limit_key(&req);
            let allowed = limiter.admit(&key);
            metrics.record_rate_check(allowed);

            if allowed {
                return inner.call(req).await;
            }

            let retry_after = limiter.remaining_window(&key);
            warn!(
                client = %key,
                retry_after_ms = retry_after.as_millis() as u64,
                path = %req.uri().path(),
                "Rate limit exceeded"
            );
            Ok(Rejection::RateLimitExceeded { retry_after }.into_response())
        })
    }
}

/// Extract the rate-limit key from request
fn rate_limit_key<B>(req: &Request<B>) -> String {
    let resolved = req.extensions().get::<ClientAddr>().copied().or_else(|| {
        // Layer used without ClientIpLayer
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|connect_info| ClientAddr(connect_info.0.ip()))
    });

    ClientAddr::key_for(resolved.as_ref())
}
