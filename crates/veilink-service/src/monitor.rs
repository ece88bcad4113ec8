// ============================================
// File: crates/veilink-service/src/monitor.rs
// ============================================
//! # Default-Interface Monitor
//!
//! ## Creation Reason
//! Tracks the OS default network interface via platform callbacks and
//! exposes it as a lookup for outbound sockets that must bypass the
//! tunnel.
//!
//! ## State Machine
//! ```text
//! ┌─────────┐  start()  ┌──────────────────────────┐  close()  ┌─────────┐
//! │ Stopped │ ────────► │ Running (name, index)    │ ────────► │ Stopped │
//! └─────────┘           └──────────────────────────┘           └─────────┘
//! ```
//! Every platform callback refreshes the lookup state unconditionally;
//! a human-readable change message is logged only when `(name, index)`
//! differs from the last observed pair, to avoid flooding on no-op
//! callbacks.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The monitor is owned by, and only by, the tun bridge
//! - `close` must release the platform callback registration or hosts
//!   leak observers across restarts

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use veilink_platform::traits::{
    DefaultInterface, InterfaceLookup, InterfaceObserver, InterfaceUpdate, Platform,
};

use crate::error::{Result, ServiceError};

// ============================================
// DefaultInterfaceMonitor
// ============================================

/// Tracks the default interface reported by the host platform.
pub struct DefaultInterfaceMonitor {
    platform: Arc<dyn Platform>,
    current: RwLock<Option<DefaultInterface>>,
    running: AtomicBool,
    changes: AtomicU64,
}

impl DefaultInterfaceMonitor {
    /// Creates a stopped monitor.
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>) -> Arc<Self> {
        Arc::new(Self {
            platform,
            current: RwLock::new(None),
            running: AtomicBool::new(false),
            changes: AtomicU64::new(0),
        })
    }

    /// Subscribes to platform callbacks and starts tracking.
    ///
    /// # Errors
    /// - [`ServiceError::AlreadyRunning`] if started twice
    /// - Platform errors if the subscription fails
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::AlreadyRunning);
        }
        let observer: Arc<dyn InterfaceObserver> = Arc::clone(self) as Arc<dyn InterfaceObserver>;
        if let Err(e) = self.platform.subscribe_default_interface(observer) {
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    /// Releases the platform callback registration.
    ///
    /// # Errors
    /// Returns platform errors from the unsubscribe call.
    pub fn close(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.platform.unsubscribe_default_interface()?;
        Ok(())
    }

    /// Returns `true` while tracking.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the currently tracked interface.
    #[must_use]
    pub fn current(&self) -> Option<DefaultInterface> {
        self.current.read().clone()
    }

    /// Number of observed `(name, index)` changes since creation.
    #[must_use]
    pub fn change_count(&self) -> u64 {
        self.changes.load(Ordering::SeqCst)
    }
}

impl InterfaceObserver for DefaultInterfaceMonitor {
    fn on_default_interface_changed(&self, update: InterfaceUpdate) {
        let next = DefaultInterface {
            name: update.name.clone(),
            index: update.index,
        };
        let changed = {
            let mut current = self.current.write();
            let changed = current.as_ref() != Some(&next);
            // Refresh unconditionally, even on no-op callbacks.
            *current = Some(next);
            changed
        };
        if changed {
            self.changes.fetch_add(1, Ordering::SeqCst);
            info!(
                "updated default interface {}, index {}, expensive {}, constrained {}",
                update.name, update.index, update.expensive, update.constrained
            );
        }
    }
}

impl InterfaceLookup for DefaultInterfaceMonitor {
    fn default_interface(&self) -> Option<DefaultInterface> {
        self.current()
    }
}

impl std::fmt::Debug for DefaultInterfaceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultInterfaceMonitor")
            .field("running", &self.is_running())
            .field("current", &self.current())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use veilink_platform::tun::MockPlatform;

    fn update(name: &str, index: i32) -> InterfaceUpdate {
        InterfaceUpdate {
            name: name.to_owned(),
            index,
            expensive: false,
            constrained: false,
        }
    }

    #[test]
    fn test_state_machine() {
        let platform = Arc::new(MockPlatform::new());
        let monitor = DefaultInterfaceMonitor::new(Arc::clone(&platform) as Arc<dyn Platform>);

        assert!(!monitor.is_running());
        monitor.start().unwrap();
        assert!(monitor.is_running());
        assert!(platform.has_observer());

        assert!(matches!(
            monitor.start(),
            Err(ServiceError::AlreadyRunning)
        ));

        monitor.close().unwrap();
        assert!(!monitor.is_running());
        assert!(!platform.has_observer());

        // Closing twice is harmless.
        monitor.close().unwrap();
    }

    #[test]
    fn test_change_detection_deduplicates() {
        let platform = Arc::new(MockPlatform::new());
        let monitor = DefaultInterfaceMonitor::new(Arc::clone(&platform) as Arc<dyn Platform>);
        monitor.start().unwrap();

        platform.fire_interface_update(update("wlan0", 3));
        assert_eq!(monitor.change_count(), 1);
        assert_eq!(
            monitor.current(),
            Some(DefaultInterface {
                name: "wlan0".to_owned(),
                index: 3
            })
        );

        // No-op callbacks refresh state but log nothing new.
        platform.fire_interface_update(update("wlan0", 3));
        platform.fire_interface_update(update("wlan0", 3));
        assert_eq!(monitor.change_count(), 1);

        platform.fire_interface_update(update("rmnet0", 5));
        assert_eq!(monitor.change_count(), 2);
        assert_eq!(monitor.current().unwrap().name, "rmnet0");
    }

    #[test]
    fn test_lookup_exposes_current() {
        let platform = Arc::new(MockPlatform::new());
        let monitor = DefaultInterfaceMonitor::new(Arc::clone(&platform) as Arc<dyn Platform>);
        monitor.start().unwrap();

        let lookup: &dyn InterfaceLookup = monitor.as_ref();
        assert!(lookup.default_interface().is_none());

        platform.fire_interface_update(update("eth0", 2));
        assert_eq!(lookup.default_interface().unwrap().index, 2);
    }
}
