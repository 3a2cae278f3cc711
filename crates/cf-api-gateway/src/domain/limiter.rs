//! Fixed-window rate limiter keyed by client address.
//!
//! Each key owns one [`RateWindowEntry`]. The first request opens a window of
//! `window_duration`; up to `max_requests` requests are admitted inside it and
//! the rest are rejected without touching the count. The first request after
//! the window closes opens a fresh one (reset-on-expiry, not a rolling rate).
//!
//! Entries live in a sharded [`DashMap`]. `admit` runs its whole
//! check-and-increment while holding the shard's write lock, so two concurrent
//! requests for the same key can never both take the last slot.
//! `remaining_window` only takes the shard's read lock.
//!
//! Expired entries are reclaimed by a periodic sweep
//! ([`RateLimiter::spawn_cleanup`]). The sweep only bounds memory: an expired
//! entry that has not been swept yet is reset lazily on its next access.

use crate::domain::config::{RateLimiterConfig, MAX_DURATION};
use crate::middleware::metrics::AdmissionMetrics;
use crate::ports::outbound::{SystemTimeSource, TimeSource};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Window state for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindowEntry {
    /// Requests admitted in the current window
    pub count: u32,
    /// Instant after which the window is considered elapsed
    pub window_end: Instant,
}

impl RateWindowEntry {
    fn open(now: Instant, window: Duration) -> Self {
        let window_end = now
            .checked_add(window)
            .or_else(|| now.checked_add(MAX_DURATION))
            .unwrap_or(now);
        Self {
            count: 1,
            window_end,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now > self.window_end
    }
}

/// Per-key fixed-window limiter shared across request handlers
pub struct RateLimiter {
    windows: DashMap<String, RateWindowEntry>,
    config: RateLimiterConfig,
    clock: Arc<dyn TimeSource>,
    stop_tx: watch::Sender<bool>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_time_source(config, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(config: RateLimiterConfig, clock: Arc<dyn TimeSource>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            windows: DashMap::new(),
            config,
            clock,
            stop_tx,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Check and record one request for `key`. Returns whether it may proceed.
    pub fn admit(&self, key: &str) -> bool {
        let now = self.clock.instant();

        match self.windows.entry(key.to_owned()) {
            Entry::Vacant(vacant) => {
                debug!(key = key, "Opening rate limit window");
                vacant.insert(RateWindowEntry::open(now, self.config.window_duration));
                true
            }
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                if window.is_expired(now) {
                    *window = RateWindowEntry::open(now, self.config.window_duration);
                    true
                } else if window.count >= self.config.max_requests {
                    false
                } else {
                    window.count += 1;
                    true
                }
            }
        }
    }

    /// Time left in `key`'s current window; zero when unknown or elapsed.
    pub fn remaining_window(&self, key: &str) -> Duration {
        let now = self.clock.instant();
        self.windows
            .get(key)
            .map(|window| window.window_end.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Snapshot of `key`'s window, if tracked.
    pub fn window(&self, key: &str) -> Option<RateWindowEntry> {
        self.windows.get(key).map(|window| *window)
    }

    /// Remove every entry whose window has elapsed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.instant();
        let mut removed = 0;
        self.windows.retain(|_, window| {
            let keep = !window.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of keys currently holding a window
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Start the periodic sweep on the current Tokio runtime.
    ///
    /// The task holds only a weak reference, so it also ends when the limiter
    /// is dropped. Calling this after [`RateLimiter::stop`] spawns a task that
    /// exits immediately.
    pub fn spawn_cleanup(self: &Arc<Self>, metrics: Arc<AdmissionMetrics>) -> JoinHandle<()> {
        let limiter = Arc::downgrade(self);
        let stop_rx = self.stop_tx.subscribe();
        let period = self
            .config
            .cleanup_interval
            .clamp(Duration::from_millis(1), MAX_DURATION);
        tokio::spawn(cleanup_task(limiter, stop_rx, period, metrics))
    }

    /// Signal the cleanup task to stop. Idempotent.
    ///
    /// Admission keeps working afterwards; expiry falls back to the lazy reset.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// Background task to sweep expired windows until stopped
async fn cleanup_task(
    limiter: Weak<RateLimiter>,
    mut stop_rx: watch::Receiver<bool>,
    period: Duration,
    metrics: Arc<AdmissionMetrics>,
) {
    if *stop_rx.borrow_and_update() {
        return;
    }

    let now = tokio::time::Instant::now();
    let first_tick = now.checked_add(period).unwrap_or(now);
    let mut ticker = tokio::time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(interval_ms = period.as_millis() as u64, "Rate limit cleanup task started");

    loop {
        tokio::select! {
            biased;

            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow_and_update() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let removed = limiter.sweep();
                metrics.record_sweep(removed);
                if removed > 0 {
                    debug!(
                        removed = removed,
                        remaining = limiter.tracked_keys(),
                        "Swept expired rate limit windows"
                    );
                }
            }
        }
    }

    info!("Rate limit cleanup task stopped");
}
