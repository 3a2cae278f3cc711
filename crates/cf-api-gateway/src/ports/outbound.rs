//! Outbound ports for the API Gateway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source trait for testability.
///
/// Rate limit windows are measured on the monotonic clock, token timestamps on
/// the wall clock, so both are exposed from the same source.
pub trait TimeSource: Send + Sync {
    /// Wall-clock seconds since the Unix epoch.
    fn now(&self) -> u64;

    /// Monotonic instant.
    fn instant(&self) -> Instant;
}

/// System time implementation
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_else(|_| {
                // Clock before Unix epoch - return 0 rather than panic
                0
            })
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self
    }
}

/// Manually advanced clock.
///
/// Both readings start at the values captured by [`ManualTimeSource::new`] and
/// only move when [`ManualTimeSource::advance`] is called.
pub struct ManualTimeSource {
    origin: Instant,
    unix_origin: u64,
    offset_ms: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(unix_origin: u64) -> Self {
        Self {
            origin: Instant::now(),
            unix_origin,
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Total time advanced since construction.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> u64 {
        self.unix_origin + self.elapsed().as_secs()
    }

    fn instant(&self) -> Instant {
        self.origin + self.elapsed()
    }
}
