// ============================================
// File: crates/veilink-platform/src/stack/mod.rs
// ============================================
//! # Packet/Stream Stack Seam
//!
//! ## Creation Reason
//! The user-space network stack that reassembles TUN packets into TCP
//! streams and UDP associations is an external collaborator. This
//! module defines how the bridge builds one, and how admitted flows are
//! surfaced back.
//!
//! ## Main Functionality
//! - `NetStack` / `StackProvider`: lifecycle and construction seam
//! - `FlowHandler`: receives every admitted flow
//! - `StreamFlow` / `DatagramFlow`: the two flow shapes
//! - `PacketConn`: per-packet addressed datagram connection
//!
//! ## Flow Surfacing Contract
//! ```text
//! ┌─────────┐   IP packets   ┌───────────┐  StreamFlow    ┌─────────┐
//! │   TUN   │ ─────────────► │ NetStack  │ ─────────────► │ Handler │
//! │ device  │ ◄───────────── │ (external)│  DatagramFlow  │ (bridge)│
//! └─────────┘                └───────────┘                └─────────┘
//! ```
//! The stack invokes the handler once per admitted flow, each on a
//! dedicated task; handler implementations may run until the flow
//! completes.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `StackOptions` owns the (duplicated) TUN descriptor; closing the
//!   stack must close that descriptor
//! - `PacketRead::recv` yields the per-packet destination address; a
//!   single association can address multiple peers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::options::TunOptions;
use crate::traits::{InterfaceLookup, TunDescriptor};

#[cfg(any(test, feature = "mock"))]
pub mod memory;

#[cfg(any(test, feature = "mock"))]
pub use memory::{MemoryStack, MemoryStackProvider};

// ============================================
// Flow Shapes
// ============================================

/// Raw byte stream of an admitted TCP-like flow.
pub trait FlowStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> FlowStream for T {}

/// One TCP-like connection surfaced by the stack.
pub struct StreamFlow {
    /// Source socket address inside the tunnel.
    pub source: SocketAddr,
    /// Destination socket address.
    pub destination: SocketAddr,
    /// The raw platform connection.
    pub stream: Box<dyn FlowStream>,
}

/// Receiving half of a datagram association.
///
/// Split from the sending half so a flow's two copy directions can run
/// concurrently on disjoint borrows.
#[async_trait]
pub trait PacketRead: Send {
    /// Receives the next datagram and the destination it was sent to.
    ///
    /// # Returns
    /// `Ok(None)` when the association ended.
    ///
    /// # Errors
    /// Returns an I/O error if the association failed.
    async fn recv(&mut self) -> std::io::Result<Option<(Bytes, SocketAddr)>>;
}

/// Sending half of a datagram association.
#[async_trait]
pub trait PacketWrite: Send {
    /// Sends a datagram that appears to originate from `source`.
    ///
    /// # Errors
    /// Returns an I/O error if the association failed.
    async fn send(&mut self, data: Bytes, source: SocketAddr) -> std::io::Result<()>;
}

/// One UDP association surfaced by the stack.
pub struct DatagramFlow {
    /// Source socket address inside the tunnel.
    pub source: SocketAddr,
    /// Primary destination address of the association.
    pub destination: SocketAddr,
    /// Receiving half of the raw packet connection.
    pub reader: Box<dyn PacketRead>,
    /// Sending half of the raw packet connection.
    pub writer: Box<dyn PacketWrite>,
}

// ============================================
// FlowHandler
// ============================================

/// Receives every flow the stack admits.
///
/// The stack invokes each call on a dedicated task; implementations may
/// block until the flow completes.
#[async_trait]
pub trait FlowHandler: Send + Sync {
    /// Handles one admitted TCP-like flow until it completes.
    async fn handle_stream(&self, flow: StreamFlow);

    /// Handles one admitted UDP association until it completes.
    async fn handle_datagram(&self, flow: DatagramFlow);
}

// ============================================
// NetStack
// ============================================

/// A constructed packet/stream stack bound to a TUN descriptor.
#[async_trait]
pub trait NetStack: Send + Sync {
    /// Starts the stack and the descriptor reader.
    ///
    /// # Errors
    /// Fatal to bridge startup; the caller closes the stack and the
    /// descriptor.
    async fn start(&self) -> Result<()>;

    /// Stops the stack and closes the owned TUN descriptor.
    ///
    /// Idempotent.
    ///
    /// # Errors
    /// Returns an error if teardown fails; the descriptor is released
    /// regardless.
    async fn close(&self) -> Result<()>;
}

/// Everything a stack needs at construction time.
pub struct StackOptions {
    /// Duplicated TUN descriptor; the stack owns and closes it.
    pub tun: Box<dyn TunDescriptor>,
    /// Session-immutable interface options.
    pub tun_options: TunOptions,
    /// Receiver of admitted flows.
    pub handler: Arc<dyn FlowHandler>,
    /// Default-interface lookup for tunnel-bypass sockets.
    pub interfaces: Arc<dyn InterfaceLookup>,
    /// Idle timeout for UDP associations.
    pub udp_timeout: Duration,
    /// Whether to capture all networks, not just the default route.
    pub include_all_networks: bool,
}

/// Builds stacks; supplied to the bridge by the host.
pub trait StackProvider: Send + Sync {
    /// Constructs a stack bound to the given descriptor.
    ///
    /// # Errors
    /// Fatal to bridge startup. The options (and the descriptor they
    /// own) are dropped on failure, releasing the descriptor.
    fn build(&self, options: StackOptions) -> Result<Arc<dyn NetStack>>;
}
