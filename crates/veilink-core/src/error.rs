// ============================================
// File: crates/veilink-core/src/error.rs
// ============================================
//! # Core Error Types

use thiserror::Error;

use veilink_common::error::CommonError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error types covering protocol decoding and engine dispatch.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Protocol Errors
    // ========================================
    /// Command byte outside the defined set.
    #[error("Unknown command: {0}")]
    UnknownCommand(u8),

    /// Severity byte outside the defined set.
    #[error("Unknown severity: {0}")]
    UnknownSeverity(u8),

    /// Buffer ended before a complete frame.
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes needed for the frame
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Frame payload exceeds the protocol limit.
    #[error("Frame too large: {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Declared payload length
        len: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Frame payload is not valid UTF-8.
    #[error("Frame payload is not valid UTF-8")]
    InvalidUtf8,

    // ========================================
    // Engine Errors
    // ========================================
    /// The engine refused to dispatch a flow.
    #[error("Dispatch to {destination} failed: {reason}")]
    Dispatch {
        /// Destination that was refused
        destination: String,
        /// Engine-supplied reason
        reason: String,
    },

    /// Operation attempted against a closed engine.
    #[error("Proxy engine is closed")]
    EngineClosed,

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

impl CoreError {
    /// Creates a `TooShort` error.
    #[must_use]
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::TooShort { expected, actual }
    }

    /// Creates a `Dispatch` error.
    pub fn dispatch(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dispatch {
            destination: destination.into(),
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

    /// Returns `true` if this is a protocol (framing) error.
    ///
    /// Protocol errors close the offending connection without affecting
    /// siblings.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownCommand(_)
                | Self::UnknownSeverity(_)
                | Self::TooShort { .. }
                | Self::FrameTooLarge { .. }
                | Self::InvalidUtf8
        )
    }

    /// Returns `true` if this error came from the proxying engine.
    #[must_use]
    pub const fn is_engine_error(&self) -> bool {
        matches!(self, Self::Dispatch { .. } | Self::EngineClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::dispatch("tcp:1.2.3.4:443", "no matching outbound");
        assert!(err.to_string().contains("tcp:1.2.3.4:443"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::UnknownCommand(0x7f).is_protocol_error());
        assert!(CoreError::too_short(3, 1).is_protocol_error());
        assert!(!CoreError::EngineClosed.is_protocol_error());
        assert!(CoreError::EngineClosed.is_engine_error());
    }
}
