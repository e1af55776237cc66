// src/utils/time.rs
//! Clock abstraction shared by the device session, the scheduler and the
//! phase controller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Shared clock handle owned by the control thread
pub type SharedClock = Arc<dyn TimeProvider>;

/// Time provider trait for dependency injection and testing
pub trait TimeProvider: Send + Sync {
    /// Monotonic time in nanoseconds since an arbitrary origin
    fn now_nanos(&self) -> u64;

    fn now_micros(&self) -> u64 {
        self.now_nanos() / 1000
    }

    /// Time elapsed since `start_nanos`, saturating at zero
    fn elapsed_since(&self, start_nanos: u64) -> Duration {
        Duration::from_nanos(self.now_nanos().saturating_sub(start_nanos))
    }

    /// Block the control thread. Only used by bounded poll loops and the
    /// blocking control loop driver.
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Monotonic time provider backed by [`Instant`]
#[derive(Debug, Clone)]
pub struct MonotonicTimeProvider {
    origin: Instant,
}

impl MonotonicTimeProvider {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Convenience constructor returning a [`SharedClock`]
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for MonotonicTimeProvider {
    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Mock time provider for deterministic testing.
///
/// `sleep` advances the mock clock instead of blocking, so bounded poll loops
/// and the blocking control loop run instantly under test.
#[derive(Debug, Default)]
pub struct MockTimeProvider {
    current_time: AtomicU64,
}

impl MockTimeProvider {
    pub fn new(initial_time_nanos: u64) -> Self {
        Self {
            current_time: AtomicU64::new(initial_time_nanos),
        }
    }

    pub fn advance_by(&self, nanos: u64) {
        self.current_time.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn advance(&self, duration: Duration) {
        self.advance_by(duration.as_nanos() as u64);
    }

    pub fn set_time(&self, nanos: u64) {
        self.current_time.store(nanos, Ordering::Relaxed);
    }
}

impl TimeProvider for MockTimeProvider {
    fn now_nanos(&self) -> u64 {
        self.current_time.load(Ordering::Relaxed)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Wall-clock timestamp used for participant records
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Convert a [`Duration`] to whole nanoseconds for timer deadlines
pub fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_time_provider() {
        let clock = MockTimeProvider::new(1_000);
        assert_eq!(clock.now_nanos(), 1_000);

        clock.advance_by(500);
        assert_eq!(clock.now_nanos(), 1_500);
        assert_eq!(clock.now_micros(), 1);

        clock.sleep(Duration::from_millis(2));
        assert_eq!(clock.now_nanos(), 2_001_500);

        clock.set_time(42);
        assert_eq!(clock.elapsed_since(40), Duration::from_nanos(2));
        assert_eq!(clock.elapsed_since(100), Duration::ZERO);
    }

    #[test]
    fn test_monotonic_provider_never_goes_backwards() {
        let clock = MonotonicTimeProvider::new();
        let first = clock.now_nanos();
        let second = clock.now_nanos();
        assert!(second >= first);
    }

    #[test]
    fn test_wall_clock_timestamp() {
        assert!(current_timestamp_millis() > 0);
    }
}
