// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! CallFlow API Gateway - request admission for the CallFlow HTTP API.
//!
//! Every inbound request is admitted by a fixed chain before it reaches a
//! handler. The first stage to reject ends the request.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     API GATEWAY (cf-api-gateway)                 │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   Tracing → CORS → ClientIp        (every route)                 │
//! │                        │                                         │
//! │  ┌─────────────────────┴──────────────────────┐                  │
//! │  │  RateLimiter         fixed window per IP   │  429             │
//! │  └─────────────────────┬──────────────────────┘                  │
//! │  ┌─────────────────────┴──────────────────────┐                  │
//! │  │  TokenAuthenticator  HS256 bearer token    │  401             │
//! │  └─────────────────────┬──────────────────────┘                  │
//! │  ┌─────────────────────┴──────────────────────┐                  │
//! │  │  CapabilityGate      plan / channel        │  403             │
//! │  └─────────────────────┬──────────────────────┘                  │
//! │                        ▼                                         │
//! │                     handler                                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cf_api_gateway::{AdmissionPipeline, GatewayConfig};
//!
//! let mut config = GatewayConfig::default();
//! config.auth.signing_secret = std::env::var("CF_JWT_SECRET")?;
//! let pipeline = AdmissionPipeline::new(config)?;
//! let listener = tokio::net::TcpListener::bind(pipeline.config().http_addr()).await?;
//! pipeline.serve(listener, shutdown_signal()).await?;
//! ```
//!
//! # Security
//!
//! - Rate limiting runs before any token parsing or MAC computation
//! - Only HS256 tokens are accepted; the MAC is compared in constant time
//! - Expired and invalid tokens are distinguished only by message, never by status
//! - Forwarded headers are honoured only from trusted proxies
//! - Rejection payloads carry fixed messages, never parse errors or secrets

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod middleware;
pub mod ports;
pub mod service;

// Re-exports for public API
pub use domain::capability::CapabilityGate;
pub use domain::claims::Claims;
pub use domain::config::GatewayConfig;
pub use domain::error::{GatewayError, Rejection};
pub use domain::limiter::RateLimiter;
pub use domain::token::{TokenAuthenticator, TokenIssuer};
pub use middleware::AdmissionMetrics;
pub use service::{AdmissionPipeline, RouteRequirement};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
