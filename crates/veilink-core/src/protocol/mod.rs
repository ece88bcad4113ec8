// ============================================
// File: crates/veilink-core/src/protocol/mod.rs
// ============================================
//! # Command Socket Protocol
//!
//! ## Creation Reason
//! Defines the wire protocol spoken on the local command socket between
//! the running service and host-side control clients.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`messages`]: Status snapshot types
//! - [`codec`]: Binary frame encoding/decoding plus async frame I/O
//!
//! ## Wire Format
//! Each accepted connection begins with exactly one unsigned command
//! byte; the remainder of the connection is command-specific and carries
//! no further multiplexing. All multi-byte integers are little-endian.
//!
//! ```text
//! connection:  [command u8] [command-specific frames...]
//!
//! log record:  [severity u8][len u16][utf-8 bytes]
//! result:      [0]  -or-  [1][len u16][utf-8 message]
//! status:      [running u8][active_flows u32][uplink u64]
//!              [downlink u64][uptime_secs u64]
//! proxy state: [available u8][enabled u8]
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Command byte values are frozen; host apps hard-code them
//! - `SetSystemProxy` is the only command with a request body
//!   (one enable octet following the command byte)

pub mod codec;
pub mod messages;

pub use codec::ProtocolCodec;
pub use messages::{ServiceStatus, SystemProxyStatus};

use crate::error::{CoreError, Result};

// ============================================
// CommandCode
// ============================================

/// Command codes accepted on the command socket.
///
/// One command per connection; the handler owns the connection until it
/// closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    /// Flush log history, then stream subsequent records.
    Log = 0,
    /// Return a point-in-time service status snapshot.
    Status = 1,
    /// Invoke the host reload hook.
    ServiceReload = 2,
    /// Invoke the host post-close hook.
    ServiceClose = 3,
    /// Force termination of all active flows.
    CloseConnections = 4,
    /// Query host OS system-proxy state.
    GetSystemProxy = 5,
    /// Set host OS system-proxy enabled flag.
    SetSystemProxy = 6,
}

impl CommandCode {
    /// Parses a wire byte into a command code.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownCommand`] for bytes outside the
    /// defined set.
    pub const fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Log),
            1 => Ok(Self::Status),
            2 => Ok(Self::ServiceReload),
            3 => Ok(Self::ServiceClose),
            4 => Ok(Self::CloseConnections),
            5 => Ok(Self::GetSystemProxy),
            6 => Ok(Self::SetSystemProxy),
            other => Err(CoreError::UnknownCommand(other)),
        }
    }

    /// Returns the wire byte for this command.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns the human-readable command name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Status => "status",
            Self::ServiceReload => "service-reload",
            Self::ServiceClose => "service-close",
            Self::CloseConnections => "close-connections",
            Self::GetSystemProxy => "get-system-proxy",
            Self::SetSystemProxy => "set-system-proxy",
        }
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_byte_values_frozen() {
        assert_eq!(CommandCode::Log.as_byte(), 0);
        assert_eq!(CommandCode::Status.as_byte(), 1);
        assert_eq!(CommandCode::ServiceReload.as_byte(), 2);
        assert_eq!(CommandCode::ServiceClose.as_byte(), 3);
        assert_eq!(CommandCode::CloseConnections.as_byte(), 4);
        assert_eq!(CommandCode::GetSystemProxy.as_byte(), 5);
        assert_eq!(CommandCode::SetSystemProxy.as_byte(), 6);
    }

    #[test]
    fn test_command_roundtrip() {
        for byte in 0..=6u8 {
            let code = CommandCode::from_byte(byte).unwrap();
            assert_eq!(code.as_byte(), byte);
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(matches!(
            CommandCode::from_byte(7),
            Err(CoreError::UnknownCommand(7))
        ));
        assert!(matches!(
            CommandCode::from_byte(0xff),
            Err(CoreError::UnknownCommand(0xff))
        ));
    }
}
