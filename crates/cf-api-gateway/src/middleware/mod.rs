//! Middleware stack for the API Gateway.
//!
//! Layer order, outermost first:
//!
//! ```text
//! Request → Tracing → CORS → ClientIp → RateLimit → Auth → RequirePlan / RequireChannel → Handler
//! ```
//!
//! Tracing, CORS, client address resolution and rate limiting wrap every
//! route. Auth and the capability gates are attached per route group, so
//! `/health` is throttled but needs no token.

pub mod auth;
pub mod capability;
pub mod client_ip;
pub mod cors;
pub mod metrics;
pub mod rate_limit;
pub mod tracing;

pub use auth::{authenticate, bearer_token, AuthLayer};
pub use capability::{Capability, RequireChannelLayer, RequirePlanLayer};
pub use client_ip::{resolve_client_ip, ClientAddr, ClientIpLayer, UNKNOWN_CLIENT};
pub use cors::create_cors_layer;
pub use metrics::{AdmissionMetrics, MetricsSnapshot, RequestTimer};
pub use rate_limit::RateLimitLayer;
pub use tracing::{RequestId, TracingLayer, REQUEST_ID_HEADER};

use crate::domain::config::GatewayConfig;
use crate::domain::limiter::RateLimiter;
use crate::domain::token::TokenAuthenticator;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Middleware stack builder
#[derive(Clone)]
pub struct MiddlewareStack {
    pub tracing: TracingLayer,
    pub cors: CorsLayer,
    pub client_ip: ClientIpLayer,
    pub rate_limit: RateLimitLayer,
    pub auth: AuthLayer,
    pub require_plan: RequirePlanLayer,
    metrics: Arc<AdmissionMetrics>,
}

impl MiddlewareStack {
    /// Create middleware stack around already constructed components
    pub fn new(
        config: &GatewayConfig,
        limiter: Arc<RateLimiter>,
        authenticator: Arc<TokenAuthenticator>,
        metrics: Arc<AdmissionMetrics>,
    ) -> Self {
        Self {
            tracing: TracingLayer::new(Arc::clone(&metrics)),
            cors: create_cors_layer(&config.cors),
            client_ip: ClientIpLayer::new(config.security.clone()),
            rate_limit: RateLimitLayer::new(limiter, Arc::clone(&metrics)),
            auth: AuthLayer::new(authenticator, Arc::clone(&metrics)),
            require_plan: RequirePlanLayer::new(Arc::clone(&metrics)),
            metrics,
        }
    }

    /// Gate for one channel
    pub fn require_channel(&self, channel: impl Into<String>) -> RequireChannelLayer {
        RequireChannelLayer::new(channel, Arc::clone(&self.metrics))
    }

    /// Get shared metrics
    pub fn metrics(&self) -> Arc<AdmissionMetrics> {
        Arc::clone(&self.metrics)
    }
}
