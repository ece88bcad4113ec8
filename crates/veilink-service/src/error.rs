// ============================================
// File: crates/veilink-service/src/error.rs
// ============================================
//! # Service Error Types

use thiserror::Error;

use veilink_common::error::CommonError;
use veilink_core::error::CoreError;
use veilink_platform::error::PlatformError;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Service error types.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        path: String,
        reason: String,
    },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        field: String,
        reason: String,
    },

    #[error("Service is already running")]
    AlreadyRunning,

    #[error("Service is not running")]
    NotRunning,

    #[error("Failed to listen on '{endpoint}': {reason}")]
    Listen {
        endpoint: String,
        reason: String,
    },

    #[error("Failed to set socket ownership: {reason}")]
    SocketOwnership {
        reason: String,
    },

    #[error("Bridge startup failed: {reason}")]
    StartupFailed {
        reason: String,
    },

    #[error("Host hook failed: {reason}")]
    Hook {
        reason: String,
    },

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn listen(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Listen {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    pub fn hook(reason: impl Into<String>) -> Self {
        Self::Hook {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. } | Self::ConfigInvalid { .. }
        )
    }

    /// Fatal errors require the host to recreate the whole service.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ConfigLoad { .. }
            | Self::ConfigInvalid { .. }
            | Self::Listen { .. }
            | Self::StartupFailed { .. } => true,
            Self::Platform(e) => e.is_startup_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServiceError::config_load("/etc/veilink/service.toml", "file not found");
        assert!(err.to_string().contains("/etc/veilink/service.toml"));
    }

    #[test]
    fn test_error_classification() {
        assert!(ServiceError::config_invalid("mtu", "too small").is_config_error());
        assert!(ServiceError::startup_failed("no route ranges").is_fatal());
        assert!(!ServiceError::hook("reload refused").is_fatal());
        assert!(
            ServiceError::Platform(PlatformError::tun_open_failed("denied")).is_fatal()
        );
    }
}
