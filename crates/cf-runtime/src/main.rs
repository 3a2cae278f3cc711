//! # CallFlow Gateway Runtime
//!
//! Composition root for the admission pipeline.
//!
//! ## Startup Sequence
//!
//! 1. Install the fmt subscriber (`RUST_LOG`, default `info`)
//! 2. Load configuration from the environment; `CF_JWT_SECRET` is required
//! 3. Build the pipeline (limiter, authenticator, capability gate)
//! 4. Bind the listener and serve; the limiter's cleanup task starts here
//! 5. On Ctrl-C, drain connections, stop the cleanup task and exit
//!
//! ## Environment
//!
//! | Variable | Meaning |
//! |---|---|
//! | `CF_JWT_SECRET` | HS256 signing secret (required) |
//! | `CF_HTTP_HOST`, `CF_HTTP_PORT` | Bind address |
//! | `CF_RATE_LIMIT_MAX` | Requests per client per window |
//! | `CF_RATE_LIMIT_WINDOW`, `CF_RATE_LIMIT_CLEANUP` | Durations such as `60s`, `5m` |
//! | `CF_TRUSTED_PROXIES` | Comma-separated proxy IPs |
//! | `CF_CORS_ORIGINS` | Comma-separated origins, `*` for any |

use anyhow::{bail, Context, Result};
use cf_api_gateway::domain::config::{humantime_serde::parse_duration, AuthenticatorConfig};
use cf_api_gateway::{AdmissionPipeline, GatewayConfig};
use std::net::IpAddr;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Load configuration from environment variables.
///
/// Unparsable optional values are logged and ignored; a missing secret or a
/// configuration that fails validation aborts startup.
fn load_config<F>(lookup: F) -> Result<GatewayConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = GatewayConfig::default();

    match lookup("CF_JWT_SECRET") {
        Some(secret) if !secret.is_empty() => {
            config.auth = AuthenticatorConfig::new(secret);
            info!("Loaded signing secret from environment");
        }
        _ => bail!("CF_JWT_SECRET must be set to a non-empty value"),
    }

    // Override bind address from environment
    override_with(&lookup, "CF_HTTP_HOST", &mut config.http.host, |v| {
        v.parse().ok()
    });
    override_with(&lookup, "CF_HTTP_PORT", &mut config.http.port, |v| {
        v.parse().ok()
    });

    // Override rate limiting from environment
    override_with(
        &lookup,
        "CF_RATE_LIMIT_MAX",
        &mut config.rate_limit.max_requests,
        |v| v.parse().ok(),
    );
    override_with(
        &lookup,
        "CF_RATE_LIMIT_WINDOW",
        &mut config.rate_limit.window_duration,
        |v| parse_duration(v).ok(),
    );
    override_with(
        &lookup,
        "CF_RATE_LIMIT_CLEANUP",
        &mut config.rate_limit.cleanup_interval,
        |v| parse_duration(v).ok(),
    );

    override_with(
        &lookup,
        "CF_TRUSTED_PROXIES",
        &mut config.security.trusted_proxies,
        |v| {
            split_list(v)
                .map(|ip| ip.parse::<IpAddr>())
                .collect::<Result<Vec<_>, _>>()
                .ok()
        },
    );
    override_with(
        &lookup,
        "CF_CORS_ORIGINS",
        &mut config.cors.allowed_origins,
        |v| {
            let origins: Vec<String> = split_list(v).map(str::to_string).collect();
            (!origins.is_empty()).then_some(origins)
        },
    );

    config
        .validate()
        .context("invalid gateway configuration")?;
    Ok(config)
}

fn override_with<F, T>(lookup: &F, key: &str, target: &mut T, parse: impl Fn(&str) -> Option<T>)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match parse(raw.trim()) {
        Some(value) => *target = value,
        None => warn!(key = key, value = %raw, "Ignoring unparsable environment override"),
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    let config = load_config(|key| std::env::var(key).ok())?;

    info!("===========================================");
    info!("  CallFlow Gateway v{}", cf_api_gateway::VERSION);
    info!(
        "  Rate limit: {} req / {:?}",
        config.rate_limit.max_requests, config.rate_limit.window_duration
    );
    info!("===========================================");

    let pipeline = AdmissionPipeline::new(config)?;
    let addr = pipeline.config().http_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Gateway is running. Press Ctrl+C to stop.");
    pipeline.serve(listener, shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}
