//! Stateless bearer tokens (HS256 compact JWS).
//!
//! A token is `base64url(header).base64url(payload).base64url(signature)`
//! where the signature is HMAC-SHA256 over `header.payload` with the shared
//! signing secret. Verification needs no storage lookup: one MAC comparison
//! and one clock check.
//!
//! ## Security Properties
//!
//! - Only `HS256` is accepted. `none`, `HS512`, `RS256` and anything else in
//!   the header is rejected before the MAC is computed.
//! - The MAC is compared in constant time (`Mac::verify_slice`).
//! - `exp` and `iat` are mandatory. A token without them is invalid.
//! - Expiry is only reported for tokens whose signature checked out, so
//!   `Expired` never leaks information about forged tokens.

use crate::domain::claims::Claims;
use crate::domain::config::{AuthenticatorConfig, ConfigError, IssuerConfig};
use crate::ports::outbound::{SystemTimeSource, TimeSource};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// The only signing algorithm accepted or produced
pub const ALGORITHM: &str = "HS256";

/// Why a token was rejected as invalid. Logged, never returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Not three non-empty dot-separated segments
    Malformed,
    /// A segment is not base64url or not JSON
    BadEncoding,
    /// Header names an algorithm other than HS256
    UnsupportedAlgorithm,
    /// MAC mismatch
    BadSignature,
    /// Payload is missing required claims or carries out-of-range values
    BadClaims,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            InvalidReason::Malformed => "malformed",
            InvalidReason::BadEncoding => "bad encoding",
            InvalidReason::UnsupportedAlgorithm => "unsupported algorithm",
            InvalidReason::BadSignature => "bad signature",
            InvalidReason::BadClaims => "bad claims",
        };
        f.write_str(reason)
    }
}

/// Token verification and issuance errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(InvalidReason),

    #[error("token expired")]
    Expired,

    /// Issuance could not produce a token
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Wire form of the claims
#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    user_id: i64,
    phone: String,
    plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    iat: i64,
    exp: i64,
}

/// HMAC key material. Debug output never shows the bytes.
#[derive(Clone)]
struct SigningKey(Arc<[u8]>);

impl SigningKey {
    fn new(secret: &str) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        Ok(Self(Arc::from(secret.as_bytes())))
    }

    fn mac(&self, signing_input: &[u8]) -> Option<HmacSha256> {
        // Hmac accepts keys of any length; the error arm is unreachable
        let mut mac = HmacSha256::new_from_slice(&self.0).ok()?;
        mac.update(signing_input);
        Some(mac)
    }

    fn sign(&self, signing_input: &[u8]) -> Option<Vec<u8>> {
        self.mac(signing_input)
            .map(|mac| mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, signing_input: &[u8], signature: &[u8]) -> bool {
        match self.mac(signing_input) {
            Some(mac) => mac.verify_slice(signature).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Verifies bearer tokens against the shared secret.
#[derive(Clone)]
pub struct TokenAuthenticator {
    key: SigningKey,
    clock: Arc<dyn TimeSource>,
}

impl TokenAuthenticator {
    pub fn new(config: &AuthenticatorConfig) -> Result<Self, ConfigError> {
        Self::with_time_source(config, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(
        config: &AuthenticatorConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            key: SigningKey::new(&config.signing_secret)?,
            clock,
        })
    }

    /// Verify `token` and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let (header_b64, payload_b64, signature_b64) = split_segments(token)?;

        let header: TokenHeader = decode_segment(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Invalid(InvalidReason::UnsupportedAlgorithm));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Invalid(InvalidReason::BadEncoding))?;
        let signing_input_len = header_b64.len() + 1 + payload_b64.len();
        let signing_input = &token.as_bytes()[..signing_input_len];
        if !self.key.verify(signing_input, &signature) {
            return Err(TokenError::Invalid(InvalidReason::BadSignature));
        }

        let payload: TokenPayload = decode_segment(payload_b64)?;
        let issued_at = timestamp(payload.iat)?;
        let expires_at = timestamp(payload.exp)?;

        let now = i64::try_from(self.clock.now()).unwrap_or(i64::MAX);
        if now >= payload.exp {
            return Err(TokenError::Expired);
        }

        Ok(Claims::new(
            payload.user_id,
            payload.phone,
            payload.plan,
            issued_at,
            expires_at,
        ))
    }
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("algorithm", &ALGORITHM)
            .finish_non_exhaustive()
    }
}

/// Signed token handed to a client after login or registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

/// Produces tokens that [`TokenAuthenticator::verify`] accepts.
#[derive(Clone)]
pub struct TokenIssuer {
    key: SigningKey,
    issuer: String,
    ttl: Duration,
    clock: Arc<dyn TimeSource>,
}

impl TokenIssuer {
    pub fn new(auth: &AuthenticatorConfig, issuer: &IssuerConfig) -> Result<Self, ConfigError> {
        Self::with_time_source(auth, issuer, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(
        auth: &AuthenticatorConfig,
        issuer: &IssuerConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        if issuer.token_ttl.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "issuer.token_ttl cannot be 0".into(),
            ));
        }
        Ok(Self {
            key: SigningKey::new(&auth.signing_secret)?,
            issuer: issuer.issuer.clone(),
            ttl: issuer.token_ttl,
            clock,
        })
    }

    /// Issue a token valid for the configured ttl.
    pub fn issue(
        &self,
        subject_id: i64,
        identity: &str,
        plan: &str,
    ) -> Result<IssuedToken, TokenError> {
        let iat = self.now_secs()?;
        let ttl = i64::try_from(self.ttl.as_secs())
            .map_err(|_| TokenError::Encoding("token ttl out of range".into()))?;
        let exp = iat
            .checked_add(ttl)
            .ok_or_else(|| TokenError::Encoding("expiry out of range".into()))?;
        self.sign(subject_id, identity, plan, iat, exp)
    }

    /// Issue a token with an explicit expiry.
    pub fn issue_with_expiry(
        &self,
        subject_id: i64,
        identity: &str,
        plan: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let iat = self.now_secs()?;
        self.sign(subject_id, identity, plan, iat, expires_at.timestamp())
    }

    fn now_secs(&self) -> Result<i64, TokenError> {
        i64::try_from(self.clock.now())
            .map_err(|_| TokenError::Encoding("clock out of range".into()))
    }

    fn sign(
        &self,
        subject_id: i64,
        identity: &str,
        plan: &str,
        iat: i64,
        exp: i64,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at =
            timestamp(exp).map_err(|_| TokenError::Encoding("expiry out of range".into()))?;
        let header = TokenHeader {
            alg: ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        };
        let payload = TokenPayload {
            user_id: subject_id,
            phone: identity.to_string(),
            plan: plan.to_string(),
            iss: Some(self.issuer.clone()),
            sub: Some(subject_id.to_string()),
            iat,
            exp,
        };

        Ok(IssuedToken {
            access_token: encode_compact(&self.key, &header, &payload)?,
            token_type: "Bearer",
            expires_at,
        })
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn split_segments(token: &str) -> Result<(&str, &str, &str), TokenError> {
    let malformed = TokenError::Invalid(InvalidReason::Malformed);
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed);
    };
    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(malformed);
    }
    Ok((header, payload, signature))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Invalid(InvalidReason::BadEncoding))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        if e.is_data() {
            TokenError::Invalid(InvalidReason::BadClaims)
        } else {
            TokenError::Invalid(InvalidReason::BadEncoding)
        }
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenError> {
    DateTime::from_timestamp(secs, 0).ok_or(TokenError::Invalid(InvalidReason::BadClaims))
}

fn encode_compact<H: Serialize, P: Serialize>(
    key: &SigningKey,
    header: &H,
    payload: &P,
) -> Result<String, TokenError> {
    let header = serde_json::to_vec(header).map_err(|e| TokenError::Encoding(e.to_string()))?;
    let payload = serde_json::to_vec(payload).map_err(|e| TokenError::Encoding(e.to_string()))?;

    let mut token = URL_SAFE_NO_PAD.encode(header);
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(payload));

    let signature = key
        .sign(token.as_bytes())
        .ok_or_else(|| TokenError::Encoding("signing key rejected".into()))?;
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(signature));
    Ok(token)
}
