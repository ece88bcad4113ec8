// ============================================
// File: crates/veilink-platform/src/traits.rs
// ============================================
//! # Platform Capability Interface
//!
//! ## Creation Reason
//! Defines the fixed method set the embedding host must supply:
//! TUN descriptor acquisition, route updates, interface monitoring,
//! connection-owner lookups, and platform odds and ends. The core never
//! talks to the OS directly for these.
//!
//! ## Main Functionality
//! - `Platform`: the host capability interface
//! - `TunDescriptor`: owned handle to a TUN file descriptor
//! - `InterfaceObserver` / `InterfaceLookup`: default-interface plumbing
//!
//! ## Design Philosophy
//! - Traits enable mock implementations for testing
//! - Concrete adapters are constructed per host platform outside the
//!   core subsystems
//! - Implementations must be Send + Sync for use in async contexts
//!
//! ## ⚠️ Important Note for Next Developer
//! - `TunDescriptor::duplicate` must yield a handle that survives the
//!   host closing its own copy
//! - `close` is idempotent; dropping a descriptor also closes it

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use veilink_common::types::Network;

use crate::error::Result;
use crate::options::{IpPrefix, TunOptions};

// ============================================
// TunDescriptor
// ============================================

/// Owned handle to a platform TUN file descriptor.
///
/// The bridge duplicates the handle returned by the host so that its
/// copy is immune to host-side closure, then hands the duplicate to the
/// packet stack.
pub trait TunDescriptor: Send + Sync {
    /// Returns the raw descriptor value, or `-1` after close.
    fn raw_fd(&self) -> i32;

    /// Duplicates the descriptor into an independent handle.
    ///
    /// # Errors
    /// Returns an error if the descriptor is closed or the duplication
    /// syscall fails.
    fn duplicate(&self) -> Result<Box<dyn TunDescriptor>>;

    /// Closes the descriptor. Idempotent.
    ///
    /// # Errors
    /// Returns an error if the close syscall fails.
    fn close(&self) -> Result<()>;
}

// ============================================
// Interface Monitoring
// ============================================

/// A change notification for the OS default network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceUpdate {
    /// Interface name (e.g. `wlan0`).
    pub name: String,
    /// Interface index.
    pub index: i32,
    /// Whether the interface is metered/expensive.
    pub expensive: bool,
    /// Whether the interface is constrained (low-data mode).
    pub constrained: bool,
}

/// Receives default-interface change callbacks from the host.
pub trait InterfaceObserver: Send + Sync {
    /// Called by the host on every default-interface callback, including
    /// no-op refreshes.
    fn on_default_interface_changed(&self, update: InterfaceUpdate);
}

/// The currently tracked default interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultInterface {
    /// Interface name.
    pub name: String,
    /// Interface index.
    pub index: i32,
}

/// Lookup consumed by the packet stack for sockets that must bypass
/// the tunnel.
pub trait InterfaceLookup: Send + Sync {
    /// Returns the current default interface, if one is tracked.
    fn default_interface(&self) -> Option<DefaultInterface>;
}

// ============================================
// Platform
// ============================================

/// The host platform capability interface.
///
/// Concrete adapters are supplied per host (mobile extension, desktop
/// helper, test mock); the core subsystems only see this trait.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Opens a TUN descriptor for the assembled options plus computed
    /// route ranges.
    ///
    /// # Errors
    /// Fatal to bridge startup.
    async fn open_tun(
        &self,
        options: &TunOptions,
        route_ranges: &[IpPrefix],
    ) -> Result<Box<dyn TunDescriptor>>;

    /// Pushes updated route options for a live session.
    ///
    /// # Errors
    /// Returns an error if the host rejects the update.
    fn update_route_options(&self, options: &TunOptions) -> Result<()>;

    /// Writes a raw log line through the host logging facility.
    fn write_log(&self, message: &str);

    /// Binds a socket descriptor to the real default interface so its
    /// traffic bypasses the tunnel.
    ///
    /// # Errors
    /// Returns an error if the bind fails or is unsupported.
    fn bind_to_default_interface(&self, raw_fd: i32) -> Result<()>;

    /// Looks up the owning uid of a four-tuple connection.
    ///
    /// # Errors
    /// Returns an error if the owner cannot be determined.
    fn find_connection_owner(
        &self,
        network: Network,
        source: SocketAddr,
        destination: SocketAddr,
    ) -> Result<u32>;

    /// Maps a uid to its package name.
    ///
    /// # Errors
    /// Returns an error if the uid is unknown or lookups are
    /// unsupported.
    fn package_name_by_uid(&self, uid: u32) -> Result<String>;

    /// Maps a package name to its uid.
    ///
    /// # Errors
    /// Returns an error if the package is unknown or lookups are
    /// unsupported.
    fn uid_by_package_name(&self, package: &str) -> Result<u32>;

    /// Subscribes an observer to default-interface change callbacks.
    ///
    /// # Errors
    /// Fatal to bridge startup.
    fn subscribe_default_interface(&self, observer: Arc<dyn InterfaceObserver>) -> Result<()>;

    /// Releases the default-interface callback registration.
    ///
    /// # Errors
    /// Returns an error if no subscription is active.
    fn unsubscribe_default_interface(&self) -> Result<()>;

    /// Whether the stack must capture all networks, not just the
    /// default route.
    fn include_all_networks(&self) -> bool;

    /// Clears the host DNS cache after route changes.
    fn clear_dns_cache(&self);
}
