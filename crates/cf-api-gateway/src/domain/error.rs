//! Admission rejections and gateway errors.
//!
//! Every rejection maps to a stable machine-readable code and a fixed
//! human-readable message. Internal detail (token parse errors, secret
//! material) never reaches the payload.

use crate::domain::config::ConfigError;
use crate::domain::response::{ApiResponse, ErrorBody};
use crate::domain::token::TokenError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;

/// Stable error codes shared with the mobile and web clients
pub mod codes {
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const UNAUTHORIZED: &str = "ERR_UNAUTHORIZED";
    pub const INVALID_TOKEN: &str = "ERR_INVALID_TOKEN";
    pub const EXPIRED_TOKEN: &str = "ERR_EXPIRED_TOKEN";
    pub const PLAN_REQUIRED: &str = "ERR_PLAN_REQUIRED";
    pub const CHANNEL_NOT_IN_PLAN: &str = "ERR_CHANNEL_NOT_IN_PLAN";
}

/// Terminal outcome of a failed admission stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Client exhausted its window
    #[error("rate limit exceeded (retry after {retry_after:?})")]
    RateLimitExceeded { retry_after: Duration },

    /// `Authorization` header present but not `Bearer <token>`
    #[error("malformed authorization header")]
    AuthHeaderMalformed,

    /// No bearer token supplied
    #[error("access token missing")]
    TokenMissing,

    /// Bad signature, bad structure or wrong algorithm
    #[error("invalid token")]
    TokenInvalid,

    /// Valid signature, lapsed expiry
    #[error("token expired")]
    TokenExpired,

    /// Caller is on the "none" plan
    #[error("active plan required")]
    PlanRequired,

    /// Caller's plan does not cover the requested channel
    #[error("channel {channel} not in plan")]
    ChannelNotInPlan { channel: String },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::RateLimitExceeded { .. } => codes::RATE_LIMIT_EXCEEDED,
            Rejection::AuthHeaderMalformed | Rejection::TokenMissing => codes::UNAUTHORIZED,
            Rejection::TokenInvalid => codes::INVALID_TOKEN,
            Rejection::TokenExpired => codes::EXPIRED_TOKEN,
            Rejection::PlanRequired => codes::PLAN_REQUIRED,
            Rejection::ChannelNotInPlan { .. } => codes::CHANNEL_NOT_IN_PLAN,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::AuthHeaderMalformed
            | Rejection::TokenMissing
            | Rejection::TokenInvalid
            | Rejection::TokenExpired => StatusCode::UNAUTHORIZED,
            Rejection::PlanRequired | Rejection::ChannelNotInPlan { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// User-facing message
    pub fn message(&self) -> String {
        match self {
            Rejection::RateLimitExceeded { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            Rejection::AuthHeaderMalformed => "Invalid authorization header format".to_string(),
            Rejection::TokenMissing => "Access token required".to_string(),
            Rejection::TokenInvalid => "Invalid token".to_string(),
            Rejection::TokenExpired => "Token has expired".to_string(),
            Rejection::PlanRequired => {
                "An active plan is required to use this feature".to_string()
            }
            Rejection::ChannelNotInPlan { channel } => {
                format!("Your plan does not include the {} channel", channel)
            }
        }
    }

    /// Whole seconds until the client may retry, rounded up.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Rejection::RateLimitExceeded { retry_after } => Some(ceil_secs(*retry_after)),
            _ => None,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.message(),
            retry_after: self.retry_after_secs(),
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

impl From<TokenError> for Rejection {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => Rejection::TokenExpired,
            // Anything else, including issuance-side faults, fails closed
            _ => Rejection::TokenInvalid,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after_secs();
        let mut response = (status, Json(ApiResponse::<()>::failure(self.to_body()))).into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

/// Gateway-level errors (startup and serving, internal use)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server socket bind or accept error
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
