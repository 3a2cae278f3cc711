//! Verified caller identity attached to a request.

use crate::domain::error::Rejection;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identity and plan taken from a verified token.
///
/// Built only by [`TokenAuthenticator::verify`](crate::domain::token::TokenAuthenticator::verify)
/// and never modified afterwards. The plan is the value frozen at issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    subject_id: i64,
    identity: String,
    plan: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Claims {
    pub(crate) fn new(
        subject_id: i64,
        identity: String,
        plan: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id,
            identity,
            plan,
            issued_at,
            expires_at,
        }
    }

    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    /// Phone number the account was registered with
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Handlers take `Claims` as an argument. If the auth layer did not run,
/// extraction fails with 401 instead of handing the handler an anonymous caller.
#[async_trait]
impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .ok_or(Rejection::TokenMissing)
    }
}
