//! # CallFlow Admission Benchmarks
//!
//! | Stage | Operation | Target |
//! |-------|-----------|--------|
//! | RateLimiter | `admit` on a hot key | < 1µs |
//! | RateLimiter | `admit` across many keys | < 2µs |
//! | TokenAuthenticator | `verify` HS256 token | < 10µs |
//! | Pipeline | rate limit + verify + capability | < 15µs |

use cf_api_gateway::domain::config::{AuthenticatorConfig, IssuerConfig, RateLimiterConfig};
use cf_api_gateway::domain::PLAN_SMS;
use cf_api_gateway::{
    AdmissionPipeline, GatewayConfig, RateLimiter, RouteRequirement, TokenAuthenticator,
    TokenIssuer,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

const SECRET: &str = "benchmark-secret";

fn unbounded_limiter() -> RateLimiter {
    RateLimiter::new(RateLimiterConfig {
        max_requests: u32::MAX,
        window_duration: Duration::from_secs(60),
        cleanup_interval: Duration::from_secs(300),
    })
}

// ============================================================================
// RateLimiter
// ============================================================================

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate-limiter");

    let limiter = unbounded_limiter();
    group.bench_function("admit_hot_key", |b| {
        b.iter(|| black_box(limiter.admit(black_box("203.0.113.1"))))
    });

    for clients in [100usize, 10_000] {
        let limiter = unbounded_limiter();
        let keys: Vec<String> = (0..clients)
            .map(|i| format!("10.{}.{}.{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff))
            .collect();

        group.throughput(Throughput::Elements(clients as u64));
        group.bench_with_input(BenchmarkId::new("admit_spread", clients), &keys, |b, keys| {
            b.iter(|| {
                for key in keys {
                    black_box(limiter.admit(key));
                }
            })
        });
    }

    group.finish();
}

// ============================================================================
// TokenAuthenticator
// ============================================================================

fn bench_token_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("token-authenticator");

    let auth = AuthenticatorConfig::new(SECRET);
    let authenticator = TokenAuthenticator::new(&auth).unwrap();
    let issuer = TokenIssuer::new(&auth, &IssuerConfig::default()).unwrap();
    let token = issuer.issue(7, "+15550107", PLAN_SMS).unwrap().access_token;

    group.bench_function("verify_valid", |b| {
        b.iter(|| black_box(authenticator.verify(black_box(&token)).is_ok()))
    });

    let mut tampered = token.clone();
    tampered.pop();
    tampered.push('A');
    group.bench_function("verify_bad_signature", |b| {
        b.iter(|| black_box(authenticator.verify(black_box(&tampered)).is_err()))
    });

    group.bench_function("issue", |b| {
        b.iter(|| black_box(issuer.issue(7, "+15550107", PLAN_SMS).is_ok()))
    });

    group.finish();
}

// ============================================================================
// Full chain without HTTP
// ============================================================================

fn bench_pipeline_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission-pipeline");

    let pipeline = AdmissionPipeline::new(GatewayConfig {
        rate_limit: RateLimiterConfig {
            max_requests: u32::MAX,
            ..Default::default()
        },
        auth: AuthenticatorConfig::new(SECRET),
        ..Default::default()
    })
    .unwrap();
    let bearer = format!(
        "Bearer {}",
        pipeline
            .issuer()
            .issue(7, "+15550107", PLAN_SMS)
            .unwrap()
            .access_token
    );
    let channel = RouteRequirement::Channel("sms".to_string());

    group.bench_function("evaluate_channel_route", |b| {
        b.iter(|| {
            black_box(
                pipeline
                    .evaluate("203.0.113.1", Some(black_box(&bearer)), &channel)
                    .is_ok(),
            )
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_rate_limiter,
    bench_token_verify,
    bench_pipeline_evaluate
);
criterion_main!(benches);
