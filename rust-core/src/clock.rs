//! Monotonic time source.
//!
//! Frame timestamps drive the decision engine. Timer-driven steps (ticks,
//! cancellations, manual confirmations) have no frame, so they read a
//! [`Clock`] instead. Both must share one time base: a pose source feeding
//! the session should stamp frames with the same clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Milliseconds since an arbitrary, fixed origin. Never decreases.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Clock backed by the runtime's monotonic instant.
///
/// Uses the tokio clock so paused-time tests advance it deterministically.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for replay and tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Move time forward. Earlier values are ignored.
    pub fn set(&self, now_ms: u64) {
        self.now.fetch_max(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared_and_monotonic() {
        let clock = ManualClock::new(100);
        let other = clock.clone();
        clock.advance(50);
        assert_eq!(other.now_ms(), 150);
        other.set(120);
        assert_eq!(clock.now_ms(), 150);
        other.set(400);
        assert_eq!(clock.now_ms(), 400);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_runtime_time() {
        let clock = MonotonicClock::new();
        tokio::time::advance(std::time::Duration::from_millis(1500)).await;
        assert!(clock.now_ms() >= 1500);
    }
}
