//! Admission counters.
//!
//! Lock-free counters updated by the admission layers and the limiter's
//! cleanup task, exported as JSON or Prometheus text at `/metrics`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Admission pipeline metrics
#[derive(Debug, Default)]
pub struct AdmissionMetrics {
    // Rate limiter
    requests_total: AtomicU64,
    admitted: AtomicU64,
    rate_limited: AtomicU64,

    // Authentication and capability
    authenticated: AtomicU64,
    unauthenticated: AtomicU64,
    forbidden: AtomicU64,

    // Cleanup
    cleanup_sweeps: AtomicU64,
    windows_swept: AtomicU64,

    // Latency (simplified - sum and count, no histogram)
    total_latency_ms: AtomicU64,
    latency_samples: AtomicU64,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    /// Passed the rate limiter
    pub admitted: u64,
    pub rate_limited: u64,
    pub authenticated: u64,
    pub unauthenticated: u64,
    pub forbidden: u64,
    pub cleanup_sweeps: u64,
    pub windows_swept: u64,
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one rate limiter decision
    pub fn record_rate_check(&self, allowed: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_authenticated(&self) {
        self.authenticated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unauthenticated(&self) {
        self.unauthenticated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forbidden(&self) {
        self.forbidden.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one cleanup pass and how many windows it removed
    pub fn record_sweep(&self, removed: usize) {
        self.cleanup_sweeps.fetch_add(1, Ordering::Relaxed);
        self.windows_swept
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_ms: u64) {
        self.total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.latency_samples.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            authenticated: self.authenticated.load(Ordering::Relaxed),
            unauthenticated: self.unauthenticated.load(Ordering::Relaxed),
            forbidden: self.forbidden.load(Ordering::Relaxed),
            cleanup_sweeps: self.cleanup_sweeps.load(Ordering::Relaxed),
            windows_swept: self.windows_swept.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters: [(&str, &str, u64); 8] = [
            ("requests_total", "Requests seen by the rate limiter", s.requests_total),
            ("admitted_total", "Requests that passed the rate limiter", s.admitted),
            ("rate_limited_total", "Requests rejected with 429", s.rate_limited),
            ("authenticated_total", "Requests with a verified bearer token", s.authenticated),
            ("unauthenticated_total", "Requests rejected with 401", s.unauthenticated),
            ("forbidden_total", "Requests rejected with 403", s.forbidden),
            ("cleanup_sweeps_total", "Rate limit cleanup passes", s.cleanup_sweeps),
            ("windows_swept_total", "Expired rate limit windows removed", s.windows_swept),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP callflow_admission_{name} {help}\n\
                 # TYPE callflow_admission_{name} counter\n\
                 callflow_admission_{name} {value}\n"
            ));
        }
        output.push_str(&format!(
            "# HELP callflow_admission_average_latency_ms Average request latency\n\
             # TYPE callflow_admission_average_latency_ms gauge\n\
             callflow_admission_average_latency_ms {:.2}\n",
            self.average_latency_ms()
        ));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let s = self.snapshot();
        serde_json::json!({
            "requests": {
                "total": s.requests_total,
                "admitted": s.admitted,
            },
            "rate_limiting": {
                "rejected": s.rate_limited,
                "cleanup_sweeps": s.cleanup_sweeps,
                "windows_swept": s.windows_swept,
            },
            "auth": {
                "authenticated": s.authenticated,
                "unauthenticated": s.unauthenticated,
                "forbidden": s.forbidden,
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}

/// Request timing helper
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<AdmissionMetrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<AdmissionMetrics>) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    /// Stop the timer; returns the elapsed milliseconds that were recorded.
    pub fn finish(self) -> u64 {
        let latency_ms = self.start.elapsed().as_millis() as u64;
        self.metrics.record_latency(latency_ms);
        latency_ms
    }
}
