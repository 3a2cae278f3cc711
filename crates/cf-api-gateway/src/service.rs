//! Admission pipeline service - composition of limiter, authenticator and gate.
//!
//! Owns the shared components, hands out the tower layers that wrap axum
//! routes, and runs the same chain without HTTP through
//! [`AdmissionPipeline::evaluate`].

use crate::domain::capability::{plan_channels, CapabilityGate, CHANNEL_SMS};
use crate::domain::claims::Claims;
use crate::domain::config::GatewayConfig;
use crate::domain::error::{GatewayError, Rejection};
use crate::domain::limiter::RateLimiter;
use crate::domain::response::ApiResponse;
use crate::domain::token::{TokenAuthenticator, TokenIssuer};
use crate::middleware::{authenticate, AdmissionMetrics, Capability, MiddlewareStack};
use crate::ports::outbound::{SystemTimeSource, TimeSource};
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// What a route demands beyond rate limiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRequirement {
    /// Rate limit only
    Public,
    /// Verified bearer token
    Authenticated,
    /// Verified token and an active plan
    Plan,
    /// Verified token and a plan that includes the channel
    Channel(String),
}

impl RouteRequirement {
    fn capability(&self) -> Option<Capability> {
        match self {
            RouteRequirement::Public | RouteRequirement::Authenticated => None,
            RouteRequirement::Plan => Some(Capability::Plan),
            RouteRequirement::Channel(channel) => Some(Capability::Channel(channel.clone())),
        }
    }
}

/// Admission pipeline: `RateLimiter → TokenAuthenticator → CapabilityGate → handler`
pub struct AdmissionPipeline {
    config: GatewayConfig,
    limiter: Arc<RateLimiter>,
    authenticator: Arc<TokenAuthenticator>,
    issuer: Arc<TokenIssuer>,
    metrics: Arc<AdmissionMetrics>,
    stack: MiddlewareStack,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl AdmissionPipeline {
    /// Create a pipeline; the cleanup task is not running until [`start`](Self::start).
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_time_source(config, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(
        config: GatewayConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::with_time_source(
            config.rate_limit.clone(),
            Arc::clone(&clock),
        ));
        let authenticator = Arc::new(TokenAuthenticator::with_time_source(
            &config.auth,
            Arc::clone(&clock),
        )?);
        let issuer = Arc::new(TokenIssuer::with_time_source(
            &config.auth,
            &config.issuer,
            clock,
        )?);
        let metrics = Arc::new(AdmissionMetrics::new());
        let stack = MiddlewareStack::new(
            &config,
            Arc::clone(&limiter),
            Arc::clone(&authenticator),
            Arc::clone(&metrics),
        );

        Ok(Self {
            config,
            limiter,
            authenticator,
            issuer,
            metrics,
            stack,
            cleanup: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    pub fn authenticator(&self) -> Arc<TokenAuthenticator> {
        Arc::clone(&self.authenticator)
    }

    /// Issuer sharing the authenticator's secret (login and registration flows)
    pub fn issuer(&self) -> Arc<TokenIssuer> {
        Arc::clone(&self.issuer)
    }

    pub fn metrics(&self) -> Arc<AdmissionMetrics> {
        Arc::clone(&self.metrics)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the limiter's cleanup task. No-op when already running.
    pub fn start(&self) -> Result<(), GatewayError> {
        let mut cleanup = self.cleanup.lock();
        if cleanup.is_some() {
            return Ok(());
        }

        tokio::runtime::Handle::try_current().map_err(|e| {
            GatewayError::Internal(format!("cleanup task needs a Tokio runtime: {e}"))
        })?;
        *cleanup = Some(self.limiter.spawn_cleanup(self.metrics()));
        Ok(())
    }

    /// Stop the cleanup task and wait for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.limiter.stop();

        let handle = self.cleanup.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Rate limit cleanup task ended abnormally");
            }
        }
    }

    // =========================================================================
    // Composition
    // =========================================================================

    /// Run the chain for one request outside of axum.
    ///
    /// Returns the verified claims, or `None` for public routes, which never
    /// look at the credential.
    pub fn evaluate(
        &self,
        client_key: &str,
        authorization: Option<&str>,
        requirement: &RouteRequirement,
    ) -> Result<Option<Claims>, Rejection> {
        let allowed = self.limiter.admit(client_key);
        self.metrics.record_rate_check(allowed);
        if !allowed {
            return Err(Rejection::RateLimitExceeded {
                retry_after: self.limiter.remaining_window(client_key),
            });
        }

        if *requirement == RouteRequirement::Public {
            return Ok(None);
        }

        let claims = authenticate(&self.authenticator, authorization)
            .inspect_err(|_| self.metrics.record_unauthenticated())?;
        self.metrics.record_authenticated();

        if let Some(capability) = requirement.capability() {
            capability
                .check(&claims)
                .inspect_err(|_| self.metrics.record_forbidden())?;
        }

        Ok(Some(claims))
    }

    /// Attach the per-route stages (auth, then the capability gate).
    pub fn protect<S>(&self, router: Router<S>, requirement: RouteRequirement) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let router = match requirement.capability() {
            None => router,
            Some(Capability::Plan) => router.route_layer(self.stack.require_plan.clone()),
            Some(Capability::Channel(channel)) => {
                router.route_layer(self.stack.require_channel(channel))
            }
        };

        match requirement {
            RouteRequirement::Public => router,
            _ => router.route_layer(self.stack.auth.clone()),
        }
    }

    /// Wrap a complete router in the global stages.
    pub fn wrap(&self, router: Router) -> Router {
        router
            .layer(self.stack.rate_limit.clone())
            .layer(self.stack.client_ip.clone())
            .layer(self.stack.cors.clone())
            .layer(self.stack.tracing.clone())
    }

    /// Build the HTTP router with every built-in route
    pub fn router(&self) -> Router {
        let state = AppState {
            metrics: self.metrics(),
        };

        let public = Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(metrics_handler));
        let me = Router::new().route("/api/v1/me", get(current_identity));
        let plan = Router::new().route("/api/v1/plan", get(plan_info));
        let sms = Router::new().route("/api/v1/channels/sms", get(sms_channel));

        let router = public
            .merge(self.protect(me, RouteRequirement::Authenticated))
            .merge(self.protect(plan, RouteRequirement::Plan))
            .merge(self.protect(sms, RouteRequirement::Channel(CHANNEL_SMS.to_string())))
            .with_state(state);

        self.wrap(router)
    }

    /// Serve until `shutdown` resolves, then stop the cleanup task.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start()?;

        let addr = listener.local_addr()?;
        info!(addr = %addr, "HTTP server listening");

        let result = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        self.shutdown().await;
        result?;

        info!("API Gateway stopped");
        Ok(())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    metrics: Arc<AdmissionMetrics>,
}

async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct MetricsQuery {
    format: Option<String>,
}

/// JSON by default, Prometheus text with `?format=prometheus`
async fn metrics_handler(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    match query.format.as_deref() {
        Some("prometheus") => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            state.metrics.to_prometheus(),
        )
            .into_response(),
        _ => Json(state.metrics.to_json()).into_response(),
    }
}

async fn current_identity(claims: Claims) -> impl IntoResponse {
    Json(ApiResponse::ok(claims))
}

async fn plan_info(claims: Claims) -> impl IntoResponse {
    Json(ApiResponse::ok(serde_json::json!({
        "plan": claims.plan(),
        "channels": plan_channels(claims.plan()),
    })))
}

async fn sms_channel(claims: Claims) -> impl IntoResponse {
    Json(ApiResponse::ok(serde_json::json!({
        "channel": CHANNEL_SMS,
        "subject_id": claims.subject_id(),
        "enabled": CapabilityGate::require_channel(&claims, CHANNEL_SMS),
    })))
}
