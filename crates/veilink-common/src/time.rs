// ============================================
// File: crates/veilink-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Provides time-related utilities including atomic timestamps for
//! concurrent access in flow and service bookkeeping.
//!
//! ## Main Functionality
//! - `AtomicInstant`: Thread-safe wrapper around `Instant`
//!
//! ## Main Logical Flow
//! 1. The service stores an `AtomicInstant` at startup for uptime
//! 2. Flows update their last-activity instant without locks
//! 3. Status snapshots read these atomically
//!
//! ## ⚠️ Important Note for Next Developer
//! - `AtomicInstant` uses `AtomicU64` internally (nanoseconds since a
//!   process-wide reference instant)
//! - Be aware of potential overflow after ~584 years of uptime

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ============================================
// AtomicInstant
// ============================================

/// Thread-safe wrapper around [`Instant`] for concurrent access.
///
/// # Purpose
/// Allows multiple tasks to read/write timestamps without locks.
///
/// # Implementation
/// Stores nanoseconds elapsed since a reference instant (program start).
/// Uses `AtomicU64` with relaxed ordering; timestamps are advisory.
///
/// # Example
/// ```
/// use veilink_common::time::AtomicInstant;
/// use std::time::Instant;
///
/// let atomic = AtomicInstant::now();
/// atomic.store(Instant::now());
/// assert!(atomic.elapsed().as_secs() < 1);
/// ```
#[derive(Debug)]
pub struct AtomicInstant {
    /// Nanoseconds since the reference instant
    nanos: AtomicU64,
}

impl AtomicInstant {
    /// Reference instant (lazily initialized at first use).
    fn reference() -> Instant {
        use std::sync::OnceLock;
        static REFERENCE: OnceLock<Instant> = OnceLock::new();
        *REFERENCE.get_or_init(Instant::now)
    }

    /// Creates a new `AtomicInstant` set to the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_instant(Instant::now())
    }

    /// Creates a new `AtomicInstant` from a specific instant.
    ///
    /// Instants predating the process reference instant saturate to it.
    #[must_use]
    pub fn from_instant(instant: Instant) -> Self {
        let nanos = instant
            .saturating_duration_since(Self::reference())
            .as_nanos() as u64;
        Self {
            nanos: AtomicU64::new(nanos),
        }
    }

    /// Loads the stored instant.
    #[must_use]
    pub fn load(&self) -> Instant {
        let nanos = self.nanos.load(Ordering::Relaxed);
        Self::reference() + Duration::from_nanos(nanos)
    }

    /// Stores a new instant.
    pub fn store(&self, instant: Instant) {
        let nanos = instant
            .saturating_duration_since(Self::reference())
            .as_nanos() as u64;
        self.nanos.store(nanos, Ordering::Relaxed);
    }

    /// Updates the stored instant to now.
    pub fn touch(&self) {
        self.store(Instant::now());
    }

    /// Returns the elapsed time since the stored instant.
    ///
    /// Returns zero if the stored instant is in the future.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.load())
    }
}

impl Default for AtomicInstant {
    fn default() -> Self {
        Self::now()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_instant_store_load() {
        let atomic = AtomicInstant::now();
        let later = Instant::now() + Duration::from_millis(50);
        atomic.store(later);
        assert_eq!(atomic.load(), later);
    }

    #[test]
    fn test_atomic_instant_elapsed() {
        let atomic = AtomicInstant::now();
        std::thread::sleep(Duration::from_millis(10));
        assert!(atomic.elapsed() >= Duration::from_millis(10));

        atomic.touch();
        assert!(atomic.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_atomic_instant_concurrent_touch() {
        use std::sync::Arc;

        let atomic = Arc::new(AtomicInstant::now());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let atomic = Arc::clone(&atomic);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        atomic.touch();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(atomic.elapsed() < Duration::from_secs(1));
    }
}
