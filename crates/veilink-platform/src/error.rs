// ============================================
// File: crates/veilink-platform/src/error.rs
// ============================================
//! # Platform Error Types
//!
//! ## Creation Reason
//! Defines error types for host platform capabilities and the packet
//! stack seam: TUN acquisition, descriptor duplication, interface
//! monitoring, and stack construction.
//!
//! ## Error Categories
//! 1. **TUN Errors**: descriptor acquisition, duplication, closed use
//! 2. **Monitor Errors**: default-interface subscription failures
//! 3. **Stack Errors**: build/start failures of the packet stack
//! 4. **Capability Errors**: operations a host does not support
//!
//! ## ⚠️ Important Note for Next Developer
//! - TUN errors are fatal to bridge startup; the bridge releases every
//!   partially acquired resource before surfacing them

use thiserror::Error;

use veilink_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;

// ============================================
// PlatformError
// ============================================

/// Platform layer error types.
#[derive(Error, Debug)]
pub enum PlatformError {
    // ========================================
    // TUN Errors
    // ========================================
    /// Host refused or failed to open a TUN descriptor.
    #[error("Failed to open TUN descriptor: {reason}")]
    TunOpenFailed {
        /// Why acquisition failed
        reason: String,
    },

    /// Duplicating the TUN descriptor failed.
    #[error("Failed to duplicate TUN descriptor: {reason}")]
    TunDupFailed {
        /// Why duplication failed
        reason: String,
    },

    /// Operation on an already-closed descriptor.
    #[error("TUN descriptor is closed")]
    TunClosed,

    // ========================================
    // Monitor Errors
    // ========================================
    /// Default-interface monitor subscription failed.
    #[error("Interface monitor error: {reason}")]
    MonitorFailed {
        /// Why the subscription failed
        reason: String,
    },

    // ========================================
    // Stack Errors
    // ========================================
    /// Packet stack construction failed.
    #[error("Failed to build packet stack: {reason}")]
    StackBuildFailed {
        /// Why construction failed
        reason: String,
    },

    /// Packet stack startup failed.
    #[error("Failed to start packet stack: {reason}")]
    StackStartFailed {
        /// Why startup failed
        reason: String,
    },

    // ========================================
    // Capability Errors
    // ========================================
    /// Host does not implement the requested capability.
    #[error("Operation not supported on this platform: {operation}")]
    Unsupported {
        /// The unsupported operation
        operation: String,
    },

    /// Invalid CIDR prefix notation.
    #[error("Invalid prefix '{value}': {reason}")]
    InvalidPrefix {
        /// The offending input
        value: String,
        /// Why it failed to parse
        reason: String,
    },

    /// Permission denied for a privileged operation.
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// What operation was denied
        operation: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================
    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Error from the common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl PlatformError {
    /// Creates a `TunOpenFailed` error.
    pub fn tun_open_failed(reason: impl Into<String>) -> Self {
        Self::TunOpenFailed {
            reason: reason.into(),
        }
    }

    /// Creates a `TunDupFailed` error.
    pub fn tun_dup_failed(reason: impl Into<String>) -> Self {
        Self::TunDupFailed {
            reason: reason.into(),
        }
    }

    /// Creates a `MonitorFailed` error.
    pub fn monitor_failed(reason: impl Into<String>) -> Self {
        Self::MonitorFailed {
            reason: reason.into(),
        }
    }

    /// Creates a `StackBuildFailed` error.
    pub fn stack_build_failed(reason: impl Into<String>) -> Self {
        Self::StackBuildFailed {
            reason: reason.into(),
        }
    }

    /// Creates a `StackStartFailed` error.
    pub fn stack_start_failed(reason: impl Into<String>) -> Self {
        Self::StackStartFailed {
            reason: reason.into(),
        }
    }

    /// Creates an `Unsupported` error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Creates an `InvalidPrefix` error.
    pub fn invalid_prefix(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPrefix {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if this error is fatal to bridge startup.
    #[must_use]
    pub const fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::TunOpenFailed { .. }
                | Self::TunDupFailed { .. }
                | Self::MonitorFailed { .. }
                | Self::StackBuildFailed { .. }
                | Self::StackStartFailed { .. }
                | Self::PermissionDenied { .. }
        )
    }

    /// Returns `true` if this error concerns the TUN descriptor.
    #[must_use]
    pub const fn is_tun_error(&self) -> bool {
        matches!(
            self,
            Self::TunOpenFailed { .. } | Self::TunDupFailed { .. } | Self::TunClosed
        )
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlatformError::tun_open_failed("permission denied");
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_error_classification() {
        assert!(PlatformError::stack_start_failed("boom").is_startup_fatal());
        assert!(PlatformError::TunClosed.is_tun_error());
        assert!(!PlatformError::TunClosed.is_startup_fatal());
        assert!(!PlatformError::unsupported("clear_dns_cache").is_startup_fatal());
    }
}
