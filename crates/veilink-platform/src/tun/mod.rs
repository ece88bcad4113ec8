// ============================================
// File: crates/veilink-platform/src/tun/mod.rs
// ============================================
//! # TUN Descriptor Module
//!
//! ## Creation Reason
//! Concrete [`crate::traits::TunDescriptor`] implementations and host
//! platform adapters.
//!
//! ## Platform Implementations
//! - `unix`: fd-backed descriptor with `dup(2)` duplication
//! - `linux`: desktop host adapter opening `/dev/net/tun` directly
//! - `mock`: in-memory implementation with descriptor-leak accounting
//!
//! ## ⚠️ Important Note for Next Developer
//! - TUN packets are raw IP (no Ethernet header)
//! - Real descriptor creation requires root or CAP_NET_ADMIN
//! - Always clean up descriptors on shutdown; the mock counts them

// Platform-specific implementations
#[cfg(unix)]
pub mod unix;

#[cfg(target_os = "linux")]
pub mod linux;

// Mock implementation for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export based on platform
#[cfg(unix)]
pub use unix::FdTun;

#[cfg(target_os = "linux")]
pub use linux::LinuxPlatform;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockPlatform;
