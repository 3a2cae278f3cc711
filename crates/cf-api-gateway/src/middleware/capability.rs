//! Route-level plan and channel gates.
//!
//! Both layers read the [`Claims`] the auth layer attached. A request that
//! reaches them without claims is rejected with 401, so a route wired without
//! [`AuthLayer`](super::AuthLayer) fails closed.

use crate::domain::capability::CapabilityGate;
use crate::domain::claims::Claims;
use crate::domain::error::Rejection;
use crate::middleware::metrics::AdmissionMetrics;
use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::warn;

/// Which capability a route needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Any plan other than "none"
    Plan,
    /// A plan that includes this channel
    Channel(String),
}

impl Capability {
    pub(crate) fn check(&self, claims: &Claims) -> Result<(), Rejection> {
        match self {
            Capability::Plan => CapabilityGate::check_plan(claims),
            Capability::Channel(channel) => CapabilityGate::check_channel(claims, channel),
        }
    }
}

/// Requires an active plan
#[derive(Clone)]
pub struct RequirePlanLayer {
    metrics: Arc<AdmissionMetrics>,
}

impl RequirePlanLayer {
    pub fn new(metrics: Arc<AdmissionMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for RequirePlanLayer {
    type Service = CapabilityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CapabilityService {
            inner,
            required: Arc::new(Capability::Plan),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Requires a plan that includes one channel
#[derive(Clone)]
pub struct RequireChannelLayer {
    channel: Arc<Capability>,
    metrics: Arc<AdmissionMetrics>,
}

impl RequireChannelLayer {
    pub fn new(channel: impl Into<String>, metrics: Arc<AdmissionMetrics>) -> Self {
        Self {
            channel: Arc::new(Capability::Channel(channel.into())),
            metrics,
        }
    }
}

impl<S> Layer<S> for RequireChannelLayer {
    type Service = CapabilityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CapabilityService {
            inner,
            required: Arc::clone(&self.channel),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Capability check service shared by both layers
#[derive(Clone)]
pub struct CapabilityService<S> {
    inner: S,
    required: Arc<Capability>,
    metrics: Arc<AdmissionMetrics>,
}

impl<S> Service<Request<Body>> for CapabilityService<S>
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
        let required = Arc::clone(&self.required);
        let metrics = Arc::clone(&self.metrics);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(claims) = req.extensions().get::<Claims>() else {
                warn!(path = %req.uri().path(), "Capability check without verified claims");
                metrics.record_unauthenticated();
                return Ok(Rejection::TokenMissing.into_response());
            };

            if let Err(rejection) = required.check(claims) {
                warn!(
                    subject_id = claims.subject_id(),
                    plan = claims.plan(),
                    required = ?required,
                    "Capability denied"
                );
                metrics.record_forbidden();
                return Ok(rejection.into_response());
            }

            inner.call(req).await
        })
    }
}
