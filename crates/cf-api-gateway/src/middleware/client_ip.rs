//! Client address resolution.
//!
//! Resolves the address the rate limiter keys on and stores it in the request
//! extensions as [`ClientAddr`]. Only trusted proxies can set forwarded
//! headers; from anyone else `X-Forwarded-For` is ignored.

use crate::domain::config::SecurityConfig;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request},
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Rate-limit key used when no client address can be determined
pub const UNKNOWN_CLIENT: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolved client address, inserted into request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

impl ClientAddr {
    /// Rate-limit key for an optional address
    pub fn key_for(addr: Option<&ClientAddr>) -> String {
        addr.map(|a| a.0.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

/// Client IP layer
#[derive(Clone)]
pub struct ClientIpLayer {
    config: Arc<SecurityConfig>,
}

impl ClientIpLayer {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Never trust forwarded headers; always use the socket peer
    pub fn direct_only() -> Self {
        Self::new(SecurityConfig {
            trusted_proxies: Vec::new(),
            trust_localhost: false,
            trust_private_ips: false,
            proxy_count: 0,
        })
    }
}

impl<S> Layer<S> for ClientIpLayer {
    type Service = ClientIpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientIpService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Client IP service
#[derive(Clone)]
pub struct ClientIpService<S> {
    inner: S,
    config: Arc<SecurityConfig>,
}

impl<S> Service<Request<Body>> for ClientIpService<S>
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
        let config = Arc::clone(&self.config);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let peer = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip());

            if let Some(peer_ip) = peer {
                if !is_trusted_proxy(peer_ip, &config) {
                    if let Some(forwarded) = req.headers().get(X_FORWARDED_FOR) {
                        warn!(
                            peer_ip = %peer_ip,
                            forwarded = ?forwarded,
                            "Ignoring X-Forwarded-For from untrusted source"
                        );
                    }
                }
            }

            match resolve_client_ip(req.headers(), peer, &config) {
                Some(ip) => {
                    req.extensions_mut().insert(ClientAddr(ip));
                }
                None => debug!("Client address unknown, sharing the fallback bucket"),
            }

            inner.call(req).await
        })
    }
}

/// Determine the client IP from the socket peer and forwarded headers.
///
/// With a trusted peer, the client is the `proxy_count`-th entry from the
/// right of `X-Forwarded-For` (each proxy appends the address it saw). Without
/// a peer there is nothing to trust, so the result is `None`.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    config: &SecurityConfig,
) -> Option<IpAddr> {
    let peer = peer?;

    // If direct connection is not from a trusted proxy, use direct IP
    if !is_trusted_proxy(peer, config) || config.proxy_count == 0 {
        return Some(peer);
    }

    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok());
    let Some(forwarded) = forwarded else {
        return Some(peer);
    };

    let hops: Vec<&str> = forwarded.split(',').map(str::trim).collect();
    let Some(index) = hops.len().checked_sub(config.proxy_count) else {
        return Some(peer);
    };

    match hops.get(index).and_then(|hop| hop.parse::<IpAddr>().ok()) {
        Some(ip) => {
            debug!(forwarded = forwarded, extracted_ip = %ip, "Extracted client IP from header");
            Some(ip)
        }
        None => Some(peer),
    }
}

/// Check if an IP is a trusted proxy
fn is_trusted_proxy(ip: IpAddr, config: &SecurityConfig) -> bool {
    if config.trusted_proxies.contains(&ip) {
        return true;
    }

    if config.trust_localhost && ip.is_loopback() {
        return true;
    }

    config.trust_private_ips && is_private_ip(ip)
}

/// Check if IP is in private range
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => ipv4.is_private() || ipv4.is_link_local(),
        IpAddr::V6(ipv6) => {
            // IPv6 unique local addresses (fc00::/7)
            let octets = ipv6.octets();
            (octets[0] & 0xfe) == 0xfc
        }
    }
}
