//! # Admission Flow Tests
//!
//! Drives the assembled router one request at a time, the way a client behind
//! the listener would see it:
//!
//! 1. **RateLimiter**: per-client fixed window, 429 with `Retry-After`
//! 2. **TokenAuthenticator**: bearer token, 401 with expired vs invalid codes
//! 3. **CapabilityGate**: plan and channel checks, 403
//!
//! Time is driven by a manual clock shared by the limiter, authenticator and
//! issuer, so window and expiry boundaries are exact.

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use cf_api_gateway::domain::codes;
    use cf_api_gateway::domain::config::{AuthenticatorConfig, RateLimiterConfig};
    use cf_api_gateway::domain::{PLAN_NONE, PLAN_SMS};
    use cf_api_gateway::ports::ManualTimeSource;
    use cf_api_gateway::{AdmissionPipeline, GatewayConfig};
    use chrono::{DateTime, Utc};
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const SECRET: &str = "integration-secret";
    const T0: u64 = 1_700_000_000;

    struct Harness {
        pipeline: AdmissionPipeline,
        router: Router,
        clock: Arc<ManualTimeSource>,
    }

    impl Harness {
        fn new(max_requests: u32) -> Self {
            Self::with_config(GatewayConfig {
                rate_limit: RateLimiterConfig {
                    max_requests,
                    window_duration: Duration::from_secs(60),
                    cleanup_interval: Duration::from_secs(300),
                },
                auth: AuthenticatorConfig::new(SECRET),
                ..Default::default()
            })
        }

        fn with_config(config: GatewayConfig) -> Self {
            let clock = Arc::new(ManualTimeSource::new(T0));
            let pipeline = AdmissionPipeline::with_time_source(config, clock.clone()).unwrap();
            let router = pipeline.router();
            Self {
                pipeline,
                router,
                clock,
            }
        }

        fn bearer(&self, plan: &str) -> String {
            let token = self
                .pipeline
                .issuer()
                .issue(42, "+15550142", plan)
                .unwrap();
            format!("Bearer {}", token.access_token)
        }

        fn bearer_expiring_at(&self, expires_at: DateTime<Utc>) -> String {
            let token = self
                .pipeline
                .issuer()
                .issue_with_expiry(42, "+15550142", PLAN_SMS, expires_at)
                .unwrap();
            format!("Bearer {}", token.access_token)
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }

        fn advance_secs(&self, secs: u64) {
            self.clock.advance(Duration::from_secs(secs));
        }
    }

    fn get(path: &str, peer: [u8; 4], authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 50_000))));
        request
    }

    async fn json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn error_code(response: Response) -> String {
        json(response).await["error"]["code"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    const CLIENT: [u8; 4] = [1, 2, 3, 4];

    // =============================================================================
    // RATE LIMITING
    // =============================================================================

    /// Three requests inside the window pass; the fourth waits out the rest of it
    #[tokio::test]
    async fn test_fourth_request_in_window_is_throttled() {
        let harness = Harness::new(3);

        for step in [0, 2, 3] {
            harness.advance_secs(step);
            let response = harness.send(get("/health", CLIENT, None)).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        harness.advance_secs(5);
        let response = harness.send(get("/health", CLIENT, None)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "50");

        let body = json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], codes::RATE_LIMIT_EXCEEDED);
        assert_eq!(body["error"]["retry_after"], 50);
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let harness = Harness::new(1);

        assert_eq!(
            harness.send(get("/health", CLIENT, None)).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            harness.send(get("/health", CLIENT, None)).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        harness.advance_secs(61);
        assert_eq!(
            harness.send(get("/health", CLIENT, None)).await.status(),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_clients_are_limited_independently() {
        let harness = Harness::new(1);

        assert_eq!(
            harness.send(get("/health", CLIENT, None)).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            harness.send(get("/health", CLIENT, None)).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            harness
                .send(get("/health", [5, 6, 7, 8], None))
                .await
                .status(),
            StatusCode::OK
        );
    }

    /// Throttled requests never reach token verification
    #[tokio::test]
    async fn test_rate_limit_precedes_authentication() {
        let harness = Harness::new(1);

        let first = harness
            .send(get("/api/v1/me", CLIENT, Some("Bearer not-a-token")))
            .await;
        assert_eq!(first.status(), StatusCode::UNAUTHORIZED);

        let second = harness
            .send(get("/api/v1/me", CLIENT, Some("Bearer not-a-token")))
            .await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let snapshot = harness.pipeline.metrics().snapshot();
        assert_eq!(snapshot.rate_limited, 1);
        assert_eq!(snapshot.unauthenticated, 1);
    }

    #[tokio::test]
    async fn test_forwarded_client_from_trusted_proxy() {
        let harness = Harness::new(1);
        let loopback = [127, 0, 0, 1];

        let forwarded = |client: &str| {
            let mut request = get("/health", loopback, None);
            request
                .headers_mut()
                .insert("x-forwarded-for", client.parse().unwrap());
            request
        };

        // Two clients behind the same proxy get separate windows
        assert_eq!(
            harness.send(forwarded("203.0.113.7")).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            harness.send(forwarded("203.0.113.8")).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            harness.send(forwarded("203.0.113.7")).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        let limiter = harness.pipeline.limiter();
        assert!(limiter.window("203.0.113.7").is_some());
        assert!(limiter.window("127.0.0.1").is_none());
    }

    #[tokio::test]
    async fn test_forwarded_header_ignored_from_untrusted_peer() {
        let harness = Harness::new(5);

        let mut request = get("/health", [198, 51, 100, 20], None);
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        assert_eq!(harness.send(request).await.status(), StatusCode::OK);

        let limiter = harness.pipeline.limiter();
        assert!(limiter.window("198.51.100.20").is_some());
        assert!(limiter.window("203.0.113.9").is_none());
    }

    // =============================================================================
    // AUTHENTICATION
    // =============================================================================

    /// A long-lived token is still accepted a day after issuance
    #[tokio::test]
    async fn test_token_verified_a_day_later() {
        let harness = Harness::new(100);
        let bearer = harness.bearer(PLAN_SMS);

        harness.advance_secs(86_400);
        let response = harness.send(get("/api/v1/me", CLIENT, Some(&bearer))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["subject_id"], 42);
        assert_eq!(body["data"]["identity"], "+15550142");
        assert_eq!(body["data"]["plan"], PLAN_SMS);
    }

    #[tokio::test]
    async fn test_expired_token_is_distinguished() {
        let harness = Harness::new(100);
        let expired_at = DateTime::from_timestamp(T0 as i64 - 1, 0).unwrap();
        let bearer = harness.bearer_expiring_at(expired_at);

        let response = harness.send(get("/api/v1/me", CLIENT, Some(&bearer))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
        assert_eq!(error_code(response).await, codes::EXPIRED_TOKEN);
    }

    #[tokio::test]
    async fn test_token_expires_while_in_use() {
        let harness = Harness::new(100);
        let expires_at = DateTime::from_timestamp(T0 as i64 + 30, 0).unwrap();
        let bearer = harness.bearer_expiring_at(expires_at);

        let response = harness.send(get("/api/v1/me", CLIENT, Some(&bearer))).await;
        assert_eq!(response.status(), StatusCode::OK);

        harness.advance_secs(30);
        let response = harness.send(get("/api/v1/me", CLIENT, Some(&bearer))).await;
        assert_eq!(error_code(response).await, codes::EXPIRED_TOKEN);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_credentials() {
        let harness = Harness::new(100);

        let missing = harness.send(get("/api/v1/me", CLIENT, None)).await;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(missing).await, codes::UNAUTHORIZED);

        let wrong_scheme = harness
            .send(get("/api/v1/me", CLIENT, Some("Basic dXNlcjpwYXNz")))
            .await;
        assert_eq!(wrong_scheme.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(wrong_scheme).await, codes::UNAUTHORIZED);

        let garbage = harness
            .send(get("/api/v1/me", CLIENT, Some("Bearer a.b.c")))
            .await;
        assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(garbage).await, codes::INVALID_TOKEN);
    }

    #[tokio::test]
    async fn test_token_from_another_secret_is_invalid() {
        let harness = Harness::new(100);
        let foreign = Harness::with_config(GatewayConfig {
            auth: AuthenticatorConfig::new("some-other-secret"),
            ..Default::default()
        });
        let bearer = foreign.bearer(PLAN_SMS);

        let response = harness.send(get("/api/v1/me", CLIENT, Some(&bearer))).await;
        assert_eq!(error_code(response).await, codes::INVALID_TOKEN);
    }

    // =============================================================================
    // CAPABILITY GATING
    // =============================================================================

    #[tokio::test]
    async fn test_plan_none_is_forbidden_from_plan_routes() {
        let harness = Harness::new(100);
        let bearer = harness.bearer(PLAN_NONE);

        // Authenticated-only routes still admit the caller
        let me = harness.send(get("/api/v1/me", CLIENT, Some(&bearer))).await;
        assert_eq!(me.status(), StatusCode::OK);

        let plan = harness.send(get("/api/v1/plan", CLIENT, Some(&bearer))).await;
        assert_eq!(plan.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(plan).await, codes::PLAN_REQUIRED);

        let sms = harness
            .send(get("/api/v1/channels/sms", CLIENT, Some(&bearer)))
            .await;
        assert_eq!(sms.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(sms).await, codes::CHANNEL_NOT_IN_PLAN);

        assert_eq!(harness.pipeline.metrics().snapshot().forbidden, 2);
    }

    #[tokio::test]
    async fn test_sms_plan_reaches_sms_channel() {
        let harness = Harness::new(100);
        let bearer = harness.bearer(PLAN_SMS);

        let plan = harness.send(get("/api/v1/plan", CLIENT, Some(&bearer))).await;
        assert_eq!(plan.status(), StatusCode::OK);
        let body = json(plan).await;
        assert_eq!(body["data"]["plan"], PLAN_SMS);
        assert_eq!(body["data"]["channels"], serde_json::json!(["sms"]));

        let sms = harness
            .send(get("/api/v1/channels/sms", CLIENT, Some(&bearer)))
            .await;
        assert_eq!(sms.status(), StatusCode::OK);
        let body = json(sms).await;
        assert_eq!(body["data"]["channel"], "sms");
        assert_eq!(body["data"]["enabled"], true);
    }

    #[tokio::test]
    async fn test_unknown_plan_has_no_channels() {
        let harness = Harness::new(100);
        let bearer = harness.bearer("enterprise");

        let plan = harness.send(get("/api/v1/plan", CLIENT, Some(&bearer))).await;
        assert_eq!(plan.status(), StatusCode::OK);
        assert_eq!(json(plan).await["data"]["channels"], serde_json::json!([]));

        let sms = harness
            .send(get("/api/v1/channels/sms", CLIENT, Some(&bearer)))
            .await;
        assert_eq!(sms.status(), StatusCode::FORBIDDEN);
    }

    // =============================================================================
    // PUBLIC SURFACE
    // =============================================================================

    #[tokio::test]
    async fn test_health_and_metrics() {
        let harness = Harness::new(100);
        let bearer = harness.bearer(PLAN_SMS);

        let health = harness.send(get("/health", CLIENT, None)).await;
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(json(health).await["data"]["status"], "ok");

        harness
            .send(get("/api/v1/me", CLIENT, Some(&bearer)))
            .await;
        harness.send(get("/api/v1/me", CLIENT, None)).await;

        let metrics = harness.send(get("/metrics", CLIENT, None)).await;
        assert_eq!(metrics.status(), StatusCode::OK);
        let body = json(metrics).await;
        assert_eq!(body["auth"]["authenticated"], 1);
        assert_eq!(body["auth"]["unauthenticated"], 1);

        let text = harness
            .send(get("/metrics?format=prometheus", CLIENT, None))
            .await;
        assert_eq!(text.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(text.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("callflow_admission_"));
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let harness = Harness::new(1);

        let mut request = get("/health", CLIENT, None);
        request
            .headers_mut()
            .insert("x-request-id", "client-supplied-7".parse().unwrap());
        let response = harness.send(request).await;
        assert_eq!(response.headers()["x-request-id"], "client-supplied-7");

        // Rejections carry an id too
        let response = harness.send(get("/health", CLIENT, None)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let harness = Harness::new(100);
        let response = harness.send(get("/api/v1/nothing", CLIENT, None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
