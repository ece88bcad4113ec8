// ============================================
// File: crates/veilink-platform/src/lib.rs
// ============================================
//! # Veilink Platform - Host Capability Layer
//!
//! ## Creation Reason
//! Platform-specific TUN descriptor creation, OS-proxy toggling, and
//! interface monitoring are supplied by the embedding host. This crate
//! defines those capabilities as abstract interfaces, plus the seam to
//! the user-space packet/stream stack the tun bridge builds over the
//! descriptor.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `Platform` capability interface, descriptors, observers
//! - [`options`]: TUN addressing options and auto-route range computation
//! - [`tun`]: Descriptor implementations (unix fd, linux host, mock)
//! - [`stack`]: Packet/stream stack abstraction and flow surfacing
//! - [`error`]: Platform error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              veilink-service                        │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │   veilink-core         veilink-platform            │
//! │                        You are here ◄──            │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │             veilink-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - TUN operations require elevated privileges on real hosts
//! - Always program against the traits; concrete adapters are
//!   per-host and must stay isolated
//! - Mock implementations available with the `mock` feature

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod options;
pub mod stack;
pub mod traits;
pub mod tun;

// Re-export primary types
pub use error::{PlatformError, Result};
pub use options::{IpPrefix, TunOptions};
pub use traits::{
    DefaultInterface, InterfaceLookup, InterfaceObserver, InterfaceUpdate, Platform, TunDescriptor,
};
