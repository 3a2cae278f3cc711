//! Gateway configuration with validation.
//!
//! Every section is read once by the composition root at startup and is
//! immutable afterwards; nothing here is hot-reloadable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub http: HttpConfig,
    /// Per-client rate limiting
    pub rate_limit: RateLimiterConfig,
    /// Bearer token verification
    pub auth: AuthenticatorConfig,
    /// Token issuance (used by login/registration flows)
    pub issuer: IssuerConfig,
    /// Client address resolution behind proxies
    pub security: SecurityConfig,
    /// CORS configuration
    pub cors: CorsConfig,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()?;

        if self.auth.signing_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        if self.issuer.token_ttl.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "issuer.token_ttl cannot be 0".into(),
            ));
        }
        if self.issuer.token_ttl > MAX_DURATION {
            return Err(ConfigError::InvalidDuration(
                "issuer.token_ttl exceeds 100 years".into(),
            ));
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

/// Upper bound for every configured duration
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Fixed-window rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Requests admitted per key per window
    pub max_requests: u32,
    /// Length of one window, starting at the first admitted request
    #[serde(with = "humantime_serde")]
    pub window_duration: Duration,
    /// Period of the background sweep that drops expired windows
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_duration: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "max_requests cannot be 0".into(),
            ));
        }
        if self.window_duration.is_zero() {
            return Err(ConfigError::InvalidRateLimit(
                "window_duration cannot be 0".into(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidRateLimit(
                "cleanup_interval cannot be 0".into(),
            ));
        }
        if self.window_duration > MAX_DURATION || self.cleanup_interval > MAX_DURATION {
            return Err(ConfigError::InvalidRateLimit(
                "window_duration and cleanup_interval cannot exceed 100 years".into(),
            ));
        }
        Ok(())
    }
}

/// Token authenticator configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticatorConfig {
    /// HMAC secret shared with the issuer. Never serialized or logged.
    #[serde(skip_serializing)]
    pub signing_secret: String,
}

impl AuthenticatorConfig {
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
        }
    }
}

impl fmt::Debug for AuthenticatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatorConfig")
            .field("signing_secret", &"<redacted>")
            .finish()
    }
}

/// Token issuer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// `iss` claim written into every token
    pub issuer: String,
    /// Lifetime of an access token
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
}

/// One year, matching the access token lifetime of the mobile clients.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            issuer: "callflow-api".to_string(),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

/// Security configuration for client address resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// List of trusted proxy IPs
    pub trusted_proxies: Vec<IpAddr>,
    /// Trust loopback peers as proxies
    pub trust_localhost: bool,
    /// Trust private IPs (10.x, 172.16.x, 192.168.x)
    pub trust_private_ips: bool,
    /// Number of proxies in chain (for X-Forwarded-For parsing)
    pub proxy_count: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            trusted_proxies: Vec::new(),
            trust_localhost: true,
            trust_private_ips: false, // Security-first default
            proxy_count: 1,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins ("*" for all)
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Response headers readable by browser scripts
    pub expose_headers: Vec<String>,
    /// Max age for preflight cache
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            expose_headers: vec!["Retry-After".to_string(), "X-Request-Id".to_string()],
            max_age: 86400, // 24 hours
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Signing secret not provided
    #[error("signing secret is empty")]
    MissingSecret,
    /// Invalid duration value
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

/// Humantime serde module for Duration serialization
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `"500ms"`, `"60s"`, `"5m"`, `"2h"`, `"365d"` or plain seconds.
    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(mins, 60, "invalid minutes")
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(hours, 60 * 60, "invalid hours")
        } else if let Some(days) = s.strip_suffix('d') {
            scaled(days, 24 * 60 * 60, "invalid days")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }

    fn scaled(value: &str, unit_secs: u64, invalid: &'static str) -> Result<Duration, &'static str> {
        value
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid)?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or("duration out of range")
    }
}
