//! Domain types for the API Gateway.
//!
//! Admission components (limiter, token authenticator, capability gate),
//! configuration, errors and the response envelope. Nothing here knows about
//! tower layers; the middleware module adapts these to HTTP.

pub mod capability;
pub mod claims;
pub mod config;
pub mod error;
pub mod limiter;
pub mod response;
pub mod token;

// Re-exports for convenience
pub use capability::{plan_channels, CapabilityGate, CHANNEL_SMS, PLAN_NONE, PLAN_SMS};
pub use claims::Claims;
pub use config::{
    AuthenticatorConfig, ConfigError, CorsConfig, GatewayConfig, HttpConfig, IssuerConfig,
    RateLimiterConfig, SecurityConfig,
};
pub use error::{codes, GatewayError, Rejection};
pub use limiter::{RateLimiter, RateWindowEntry};
pub use response::{ApiResponse, ErrorBody};
pub use token::{InvalidReason, IssuedToken, TokenAuthenticator, TokenError, TokenIssuer};
