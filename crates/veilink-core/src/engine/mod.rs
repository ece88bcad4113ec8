// ============================================
// File: crates/veilink-core/src/engine/mod.rs
// ============================================
//! # Proxying Engine Abstraction
//!
//! ## Creation Reason
//! The embedded proxying engine is an external collaborator: given parsed
//! configuration it yields an instance that maps destinations to
//! bidirectional links. This module defines that seam so the tun bridge
//! never depends on engine internals.
//!
//! ## Main Functionality
//! - `ProxyEngine`: start/close lifecycle plus `dispatch`
//! - `DispatchContext`: synthetic inbound-session context for a flow
//! - `Destination`: network + socket address dispatch key
//! - `Link`, `LinkReader`, `LinkWriter`: chunk-oriented link endpoints
//!
//! ## Design Philosophy
//! - Link endpoints move data in whole chunks (`Bytes`); for datagram
//!   flows one chunk is one datagram
//! - Endpoints are independently owned so the two copy directions of a
//!   flow can run on disjoint borrows
//! - Engines are `Send + Sync` trait objects shared via `Arc`
//!
//! ## ⚠️ Important Note for Next Developer
//! - `recv` returning `Ok(None)` means orderly end-of-link, not an error
//! - Dropping a `LinkWriter` without `close` must be safe (interrupt)

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use veilink_common::types::Network;

use crate::error::Result;

#[cfg(any(test, feature = "mock"))]
pub mod memory;

pub mod direct;

pub use direct::DirectEngine;
#[cfg(any(test, feature = "mock"))]
pub use memory::MemoryEngine;

// ============================================
// Constants
// ============================================

/// Inbound tag attached to every flow admitted from the tun interface.
pub const TUN_INBOUND_TAG: &str = "tun";

// ============================================
// Destination
// ============================================

/// Dispatch key: where a flow wants to go, and over which transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Destination socket address.
    pub addr: SocketAddr,
    /// Transport protocol of the flow.
    pub network: Network,
}

impl Destination {
    /// Creates a TCP destination.
    #[must_use]
    pub const fn tcp(addr: SocketAddr) -> Self {
        Self {
            addr,
            network: Network::Tcp,
        }
    }

    /// Creates a UDP destination.
    #[must_use]
    pub const fn udp(addr: SocketAddr) -> Self {
        Self {
            addr,
            network: Network::Udp,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, self.addr)
    }
}

// ============================================
// DispatchContext
// ============================================

/// Protocol hint attached to a dispatch when the destination is
/// recognized before sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolHint {
    /// Destination port 53: treat the flow as DNS.
    Dns,
}

/// Synthetic inbound-session context handed to the engine with every
/// dispatched flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    /// Inbound tag marking the flow as tunnel-originated.
    pub inbound_tag: &'static str,
    /// Source address of the flow inside the tunnel.
    pub source: SocketAddr,
    /// Protocol hint, when the destination port identifies the protocol.
    pub protocol_hint: Option<ProtocolHint>,
    /// Whether the engine may sniff the stream to refine routing.
    pub sniffing: bool,
}

impl DispatchContext {
    /// Builds the admission context for a tunnel flow.
    ///
    /// Destination port 53 is classified as DNS (protocol hint, no
    /// sniffing); every other destination is sniffing-eligible.
    #[must_use]
    pub fn for_tunnel_flow(source: SocketAddr, destination: &Destination) -> Self {
        let is_dns = destination.addr.port() == 53;
        Self {
            inbound_tag: TUN_INBOUND_TAG,
            source,
            protocol_hint: is_dns.then_some(ProtocolHint::Dns),
            sniffing: !is_dns,
        }
    }
}

// ============================================
// Link Endpoints
// ============================================

/// Receiving end of an engine link.
#[async_trait]
pub trait LinkReader: Send {
    /// Receives the next chunk from the engine.
    ///
    /// For datagram flows one chunk is one datagram.
    ///
    /// # Returns
    /// `Ok(None)` on orderly end-of-link.
    ///
    /// # Errors
    /// Returns an I/O error if the link failed.
    async fn recv(&mut self) -> std::io::Result<Option<Bytes>>;
}

/// Sending end of an engine link.
#[async_trait]
pub trait LinkWriter: Send {
    /// Sends one chunk into the engine.
    ///
    /// # Errors
    /// Returns an I/O error if the link failed or was interrupted.
    async fn send(&mut self, data: Bytes) -> std::io::Result<()>;

    /// Closes the sending side of the link.
    ///
    /// Idempotent; dropping the writer without calling this interrupts
    /// the link instead of closing it cleanly.
    ///
    /// # Errors
    /// Returns an I/O error if the close handshake failed.
    async fn close(&mut self) -> std::io::Result<()>;
}

/// Bidirectional logical link returned by a successful dispatch.
pub struct Link {
    /// Engine → tunnel direction.
    pub reader: Box<dyn LinkReader>,
    /// Tunnel → engine direction.
    pub writer: Box<dyn LinkWriter>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

// ============================================
// ProxyEngine
// ============================================

/// The embedded proxying engine, treated as opaque by this crate.
///
/// # Lifecycle
/// `start` → any number of `dispatch` calls → `close`. After `close`,
/// dispatch fails with [`crate::error::CoreError::EngineClosed`].
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    /// Starts the engine instance.
    ///
    /// # Errors
    /// Returns an error if the engine cannot start.
    async fn start(&self) -> Result<()>;

    /// Closes the engine instance and all its links.
    ///
    /// # Errors
    /// Returns an error if shutdown fails; links are interrupted
    /// regardless.
    async fn close(&self) -> Result<()>;

    /// Maps a destination to a bidirectional link.
    ///
    /// # Errors
    /// Returns a dispatch error if the engine refuses the flow; the
    /// caller drops the raw connection and does not retry.
    async fn dispatch(&self, context: DispatchContext, destination: Destination) -> Result<Link>;

    /// Forces termination of all active links.
    ///
    /// # Returns
    /// The number of links that were terminated.
    async fn reset_connections(&self) -> usize;
}

// ============================================
// Tests
// ============================================
