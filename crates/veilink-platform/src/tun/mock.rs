// ============================================
// File: crates/veilink-platform/src/tun/mock.rs
// ============================================
//! # Mock Platform Implementation
//!
//! ## Creation Reason
//! Provides an in-memory [`Platform`] for testing the bridge and
//! service without device creation or root privileges.
//!
//! ## Main Functionality
//! - Mock TUN descriptors with shared open-descriptor accounting
//!   (leak detection across duplication and close)
//! - Configurable failure injection for TUN acquisition
//! - Manual firing of default-interface updates
//!
//! ## Usage in Tests
//! ```
//! use veilink_platform::tun::MockPlatform;
//! use veilink_platform::traits::{Platform, TunDescriptor};
//! use veilink_platform::options::TunOptions;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let platform = MockPlatform::new();
//! let tun = platform.open_tun(&TunOptions::default(), &[]).await.unwrap();
//! assert_eq!(platform.open_descriptor_count(), 1);
//! tun.close().unwrap();
//! assert_eq!(platform.open_descriptor_count(), 0);
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - Descriptor accounting is the backbone of the startup-rollback
//!   leak tests; keep increment/decrement exactly paired

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use veilink_common::types::Network;

use crate::error::{PlatformError, Result};
use crate::options::{IpPrefix, TunOptions};
use crate::traits::{InterfaceObserver, InterfaceUpdate, Platform, TunDescriptor};

// ============================================
// MockTunDescriptor
// ============================================

/// Mock descriptor sharing an open-descriptor counter with its platform.
pub struct MockTunDescriptor {
    fd: i32,
    open: AtomicBool,
    next_fd: Arc<AtomicI32>,
    open_count: Arc<AtomicUsize>,
}

impl MockTunDescriptor {
    fn create(next_fd: &Arc<AtomicI32>, open_count: &Arc<AtomicUsize>) -> Self {
        open_count.fetch_add(1, Ordering::SeqCst);
        Self {
            fd: next_fd.fetch_add(1, Ordering::SeqCst),
            open: AtomicBool::new(true),
            next_fd: Arc::clone(next_fd),
            open_count: Arc::clone(open_count),
        }
    }
}

impl TunDescriptor for MockTunDescriptor {
    fn raw_fd(&self) -> i32 {
        if self.open.load(Ordering::SeqCst) {
            self.fd
        } else {
            -1
        }
    }

    fn duplicate(&self) -> Result<Box<dyn TunDescriptor>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(PlatformError::TunClosed);
        }
        Ok(Box::new(Self::create(&self.next_fd, &self.open_count)))
    }

    fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.open_count.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MockTunDescriptor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ============================================
// MockPlatform
// ============================================

/// Mock host platform for tests.
pub struct MockPlatform {
    next_fd: Arc<AtomicI32>,
    open_count: Arc<AtomicUsize>,
    fail_open_tun: AtomicBool,
    include_all_networks: AtomicBool,
    observer: Mutex<Option<Arc<dyn InterfaceObserver>>>,
    opened_with: Mutex<Option<(TunOptions, Vec<IpPrefix>)>>,
    log_lines: Mutex<Vec<String>>,
    packages: Mutex<HashMap<u32, String>>,
    dns_cache_clears: AtomicUsize,
}

impl MockPlatform {
    /// Creates a new mock platform.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_fd: Arc::new(AtomicI32::new(100)),
            open_count: Arc::new(AtomicUsize::new(0)),
            fail_open_tun: AtomicBool::new(false),
            include_all_networks: AtomicBool::new(false),
            observer: Mutex::new(None),
            opened_with: Mutex::new(None),
            log_lines: Mutex::new(Vec::new()),
            packages: Mutex::new(HashMap::new()),
            dns_cache_clears: AtomicUsize::new(0),
        }
    }

    /// Makes every subsequent `open_tun` fail.
    pub fn set_fail_open_tun(&self, fail: bool) {
        self.fail_open_tun.store(fail, Ordering::SeqCst);
    }

    /// Number of descriptors currently open (created minus closed).
    #[must_use]
    pub fn open_descriptor_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Returns `true` if an interface observer is subscribed.
    #[must_use]
    pub fn has_observer(&self) -> bool {
        self.observer.lock().is_some()
    }

    /// Fires a default-interface update at the subscribed observer.
    pub fn fire_interface_update(&self, update: InterfaceUpdate) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_default_interface_changed(update);
        }
    }

    /// Returns the options the last `open_tun` was called with.
    #[must_use]
    pub fn opened_with(&self) -> Option<(TunOptions, Vec<IpPrefix>)> {
        self.opened_with.lock().clone()
    }

    /// Returns all lines written through `write_log`.
    #[must_use]
    pub fn log_lines(&self) -> Vec<String> {
        self.log_lines.lock().clone()
    }

    /// Registers a uid → package mapping for lookup tests.
    pub fn register_package(&self, uid: u32, package: impl Into<String>) {
        self.packages.lock().insert(uid, package.into());
    }

    /// Number of `clear_dns_cache` calls.
    #[must_use]
    pub fn dns_cache_clears(&self) -> usize {
        self.dns_cache_clears.load(Ordering::SeqCst)
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn open_tun(
        &self,
        options: &TunOptions,
        route_ranges: &[IpPrefix],
    ) -> Result<Box<dyn TunDescriptor>> {
        if self.fail_open_tun.load(Ordering::SeqCst) {
            return Err(PlatformError::tun_open_failed("mock failure injected"));
        }
        *self.opened_with.lock() = Some((options.clone(), route_ranges.to_vec()));
        Ok(Box::new(MockTunDescriptor::create(
            &self.next_fd,
            &self.open_count,
        )))
    }

    fn update_route_options(&self, _options: &TunOptions) -> Result<()> {
        Ok(())
    }

    fn write_log(&self, message: &str) {
        self.log_lines.lock().push(message.to_owned());
    }

    fn bind_to_default_interface(&self, _raw_fd: i32) -> Result<()> {
        Ok(())
    }

    fn find_connection_owner(
        &self,
        _network: Network,
        _source: SocketAddr,
        _destination: SocketAddr,
    ) -> Result<u32> {
        Err(PlatformError::unsupported("find_connection_owner"))
    }

    fn package_name_by_uid(&self, uid: u32) -> Result<String> {
        self.packages
            .lock()
            .get(&uid)
            .cloned()
            .ok_or_else(|| PlatformError::unsupported(format!("unknown uid {uid}")))
    }

    fn uid_by_package_name(&self, package: &str) -> Result<u32> {
        self.packages
            .lock()
            .iter()
            .find(|(_, name)| name.as_str() == package)
            .map(|(uid, _)| *uid)
            .ok_or_else(|| PlatformError::unsupported(format!("unknown package '{package}'")))
    }

    fn subscribe_default_interface(&self, observer: Arc<dyn InterfaceObserver>) -> Result<()> {
        let mut slot = self.observer.lock();
        if slot.is_some() {
            return Err(PlatformError::monitor_failed("observer already subscribed"));
        }
        *slot = Some(observer);
        Ok(())
    }

    fn unsubscribe_default_interface(&self) -> Result<()> {
        self.observer.lock().take();
        Ok(())
    }

    fn include_all_networks(&self) -> bool {
        self.include_all_networks.load(Ordering::SeqCst)
    }

    fn clear_dns_cache(&self) {
        self.dns_cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MockPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPlatform")
            .field("open_descriptors", &self.open_descriptor_count())
            .field("has_observer", &self.has_observer())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_descriptor_accounting() {
        let platform = MockPlatform::new();
        assert_eq!(platform.open_descriptor_count(), 0);

        let tun = platform
            .open_tun(&TunOptions::default(), &[])
            .await
            .unwrap();
        assert_eq!(platform.open_descriptor_count(), 1);

        let dup = tun.duplicate().unwrap();
        assert_eq!(platform.open_descriptor_count(), 2);
        assert_ne!(dup.raw_fd(), tun.raw_fd());

        tun.close().unwrap();
        tun.close().unwrap();
        assert_eq!(platform.open_descriptor_count(), 1);

        drop(dup);
        assert_eq!(platform.open_descriptor_count(), 0);
    }

    #[tokio::test]
    async fn test_open_tun_failure_injection() {
        let platform = MockPlatform::new();
        platform.set_fail_open_tun(true);
        assert!(platform
            .open_tun(&TunOptions::default(), &[])
            .await
            .is_err());
        assert_eq!(platform.open_descriptor_count(), 0);
    }

    #[test]
    fn test_package_lookups() {
        let platform = MockPlatform::new();
        platform.register_package(10001, "com.example.browser");
        assert_eq!(
            platform.package_name_by_uid(10001).unwrap(),
            "com.example.browser"
        );
        assert_eq!(
            platform.uid_by_package_name("com.example.browser").unwrap(),
            10001
        );
        assert!(platform.package_name_by_uid(4).is_err());
    }

    #[test]
    fn test_observer_subscription() {
        struct NullObserver;
        impl InterfaceObserver for NullObserver {
            fn on_default_interface_changed(&self, _update: InterfaceUpdate) {}
        }

        let platform = MockPlatform::new();
        assert!(!platform.has_observer());
        platform
            .subscribe_default_interface(Arc::new(NullObserver))
            .unwrap();
        assert!(platform.has_observer());
        assert!(platform
            .subscribe_default_interface(Arc::new(NullObserver))
            .is_err());
        platform.unsubscribe_default_interface().unwrap();
        assert!(!platform.has_observer());
    }
}
