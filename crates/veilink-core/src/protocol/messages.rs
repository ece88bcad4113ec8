// ============================================
// File: crates/veilink-core/src/protocol/messages.rs
// ============================================
//! # Status Message Types
//!
//! ## Creation Reason
//! Defines the structured payloads carried on the command socket:
//! the service status snapshot and the system-proxy state.
//!
//! ## Main Functionality
//! - `ServiceStatus`: point-in-time service snapshot
//! - `SystemProxyStatus`: pass-through host proxy state
//!
//! ## ⚠️ Important Note for Next Developer
//! - Fixed frame sizes below are wire constants; update them together
//!   with the codec when a field is added

use serde::{Deserialize, Serialize};

// ============================================
// Wire Size Constants
// ============================================

/// Encoded size of a [`ServiceStatus`] frame.
pub const STATUS_FRAME_SIZE: usize = 1 + 4 + 8 + 8 + 8;

/// Encoded size of a [`SystemProxyStatus`] frame.
pub const SYSTEM_PROXY_FRAME_SIZE: usize = 2;

// ============================================
// ServiceStatus
// ============================================

/// Point-in-time service status snapshot returned by the STATUS command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Whether the data plane is currently running.
    pub running: bool,
    /// Number of live flows in the tun bridge.
    pub active_flows: u32,
    /// Total bytes copied tunnel → engine since start.
    pub uplink_bytes: u64,
    /// Total bytes copied engine → tunnel since start.
    pub downlink_bytes: u64,
    /// Seconds since the service was started.
    pub uptime_secs: u64,
}

// ============================================
// SystemProxyStatus
// ============================================

/// Pass-through snapshot of the host OS system-proxy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemProxyStatus {
    /// Whether the host supports toggling a system proxy.
    pub available: bool,
    /// Whether the system proxy is currently enabled.
    pub enabled: bool,
}

impl SystemProxyStatus {
    /// A status reporting system-proxy control as unavailable.
    #[must_use]
    pub const fn unavailable() -> Self {
        Self {
            available: false,
            enabled: false,
        }
    }
}
