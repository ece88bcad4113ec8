// ============================================
// File: crates/veilink-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the fundamental value types exchanged between the control
//! plane (command server, log distribution) and the data plane (tun
//! bridge, flows), keeping wire representations in one place.
//!
//! ## Main Functionality
//! - `Severity`: Log record severity levels with stable byte encoding
//! - `LogRecord`: One line of diagnostic output held in the log history
//! - `Network`: Transport protocol discriminator for flows and dispatch
//!
//! ## Main Logical Flow
//! 1. Components emit `LogRecord`s through the active log sink
//! 2. The command server stores them in its bounded history
//! 3. Records are framed with their `Severity` byte on LOG streams
//! 4. Flows carry `Network` to select TCP-like vs UDP dispatch
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Severity::as_byte` values are part of the command socket wire
//!   format; never renumber them
//! - `LogRecord` content is UTF-8 and bounded by the codec frame size

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================
// Severity
// ============================================

/// Severity of a log record.
///
/// The byte values are stable wire identifiers used by the LOG command
/// stream framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Verbose diagnostics, normally filtered out.
    Debug,
    /// Routine operational messages.
    Info,
    /// Something unexpected, service continues.
    Warning,
    /// An operation failed.
    Error,
}

impl Severity {
    /// Returns the stable wire byte for this severity.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Debug => 0,
            Self::Info => 1,
            Self::Warning => 2,
            Self::Error => 3,
        }
    }

    /// Parses a wire byte back into a severity.
    ///
    /// # Returns
    /// `None` if the byte is outside the defined set.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Debug),
            1 => Some(Self::Info),
            2 => Some(Self::Warning),
            3 => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns the lowercase label used in human-readable output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================
// LogRecord
// ============================================

/// One diagnostic record: severity plus textual content.
///
/// Records are what the command server stores in its bounded history and
/// streams to LOG subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Severity of the record.
    pub severity: Severity,
    /// UTF-8 message content, without trailing newline.
    pub message: String,
}

impl LogRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    /// Convenience constructor for an info-level record.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    /// Convenience constructor for an error-level record.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

// ============================================
// Network
// ============================================

/// Transport protocol of a flow or dispatch destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Stream-oriented (TCP-like) traffic.
    Tcp,
    /// Datagram-oriented (UDP association) traffic.
    Udp,
}

impl Network {
    /// Returns the lowercase protocol label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_byte_roundtrip() {
        for severity in [
            Severity::Debug,
            Severity::Info,
            Severity::Warning,
            Severity::Error,
        ] {
            assert_eq!(Severity::from_byte(severity.as_byte()), Some(severity));
        }
    }

    #[test]
    fn test_severity_unknown_byte() {
        assert_eq!(Severity::from_byte(4), None);
        assert_eq!(Severity::from_byte(0xff), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_log_record_display() {
        let record = LogRecord::new(Severity::Warning, "listener closed");
        assert_eq!(record.to_string(), "[warning] listener closed");
    }

    #[test]
    fn test_network_labels() {
        assert_eq!(Network::Tcp.to_string(), "tcp");
        assert_eq!(Network::Udp.to_string(), "udp");
    }

    #[test]
    fn test_severity_json_serialization() {
        let json = serde_json::to_string(&Severity::Error).unwrap();
        assert_eq!(json, "\"error\"");
        let parsed: Severity = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Severity::Error);
    }
}
