//! Bearer token authentication middleware.
//!
//! Second stage of the admission chain. Parses `Authorization: Bearer <token>`,
//! verifies the token and attaches the resulting [`Claims`] to the request
//! extensions for capability layers and handlers.

use crate::domain::claims::Claims;
use crate::domain::error::Rejection;
use crate::domain::token::TokenAuthenticator;
use crate::middleware::metrics::AdmissionMetrics;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::{debug, warn};

const BEARER_SCHEME: &str = "Bearer";

/// Authentication layer
#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<TokenAuthenticator>,
    metrics: Arc<AdmissionMetrics>,
}

impl AuthLayer {
    pub fn new(authenticator: Arc<TokenAuthenticator>, metrics: Arc<AdmissionMetrics>) -> Self {
        Self {
            authenticator,
            metrics,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: Arc::clone(&self.authenticator),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<TokenAuthenticator>,
    metrics: Arc<AdmissionMetrics>,
}

impl<S> Service<Request<Body>> for AuthService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let authenticator = Arc::clone(&self.authenticator);
        let metrics = Arc::clone(&self.metrics);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match authenticate_headers(&authenticator, req.headers()) {
                Ok(claims) => {
                    metrics.record_authenticated();
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(rejection) => {
                    metrics.record_unauthenticated();
                    Ok(rejection.into_response())
                }
            }
        })
    }
}

/// Extract the token from an `Authorization` header value.
///
/// The value must be exactly two space-separated parts with the `Bearer`
/// scheme. An absent header, an empty header or an empty token all mean no
/// credential was supplied.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, Rejection> {
    let value = match authorization {
        None | Some("") => return Err(Rejection::TokenMissing),
        Some(value) => value,
    };

    let mut parts = value.split(' ');
    let (Some(scheme), Some(token), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Rejection::AuthHeaderMalformed);
    };
    if scheme != BEARER_SCHEME {
        return Err(Rejection::AuthHeaderMalformed);
    }
    if token.is_empty() {
        return Err(Rejection::TokenMissing);
    }

    Ok(token)
}

/// Parse and verify the credential, logging the internal reason on failure.
pub fn authenticate(
    authenticator: &TokenAuthenticator,
    authorization: Option<&str>,
) -> Result<Claims, Rejection> {
    let token = bearer_token(authorization).inspect_err(|rejection| {
        debug!(reason = %rejection, "Bearer credential rejected");
    })?;

    match authenticator.verify(token) {
        Ok(claims) => {
            debug!(
                subject_id = claims.subject_id(),
                plan = claims.plan(),
                "Token verified"
            );
            Ok(claims)
        }
        Err(e) => {
            warn!(reason = %e, "Token verification failed");
            Err(Rejection::from(e))
        }
    }
}

fn authenticate_headers(
    authenticator: &TokenAuthenticator,
    headers: &HeaderMap,
) -> Result<Claims, Rejection> {
    let authorization = match headers.get(header::AUTHORIZATION) {
        None => None,
        // Opaque (non-visible-ASCII) values cannot hold a bearer token
        Some(value) => Some(value.to_str().map_err(|_| Rejection::AuthHeaderMalformed)?),
    };
    authenticate(authenticator, authorization)
}
