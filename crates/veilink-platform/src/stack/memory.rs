// ============================================
// File: crates/veilink-platform/src/stack/memory.rs
// ============================================
//! # Memory Stack Implementation
//!
//! ## Creation Reason
//! In-memory [`NetStack`] for tests: instead of parsing IP packets it
//! lets tests inject synthetic flows directly at the handler.
//!
//! ## Main Functionality
//! - `MemoryStack`: holds the descriptor, spawns one task per injected
//!   flow
//! - `MemoryStackProvider`: failure injection for build/start, access
//!   to the last built stack
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - `close` must close the owned TUN descriptor; the startup-rollback
//!   tests depend on it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::error::{PlatformError, Result};
use crate::stack::{
    DatagramFlow, FlowHandler, NetStack, PacketRead, PacketWrite, StackOptions, StackProvider,
    StreamFlow,
};
use crate::traits::TunDescriptor;

/// Buffer size of injected duplex streams.
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Channel capacity of injected packet connections.
const PACKET_CHANNEL_CAPACITY: usize = 64;

// ============================================
// MemoryStack
// ============================================

/// In-memory stack that surfaces test-injected flows.
pub struct MemoryStack {
    tun: Mutex<Option<Box<dyn TunDescriptor>>>,
    handler: Arc<dyn FlowHandler>,
    started: AtomicBool,
    closed: AtomicBool,
    fail_start: AtomicBool,
}

impl MemoryStack {
    fn new(options: StackOptions, fail_start: bool) -> Self {
        Self {
            tun: Mutex::new(Some(options.tun)),
            handler: options.handler,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_start: AtomicBool::new(fail_start),
        }
    }

    /// Returns `true` once `start` succeeded.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns `true` once `close` ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Injects a synthetic stream flow; returns the test's end of it.
    pub fn open_stream(
        &self,
        source: std::net::SocketAddr,
        destination: std::net::SocketAddr,
    ) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(STREAM_BUFFER_SIZE);
        self.inject_stream(StreamFlow {
            source,
            destination,
            stream: Box::new(remote),
        });
        local
    }

    /// Injects a prebuilt stream flow (custom stream types).
    pub fn inject_stream(&self, flow: StreamFlow) {
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            handler.handle_stream(flow).await;
        });
    }

    /// Injects a synthetic datagram flow.
    ///
    /// # Returns
    /// The test's side: a sender for inbound datagrams (payload plus
    /// per-packet destination) and a receiver for what the flow writes
    /// back (payload plus claimed source).
    pub fn open_datagram(
        &self,
        source: std::net::SocketAddr,
        destination: std::net::SocketAddr,
    ) -> (
        mpsc::Sender<(Bytes, std::net::SocketAddr)>,
        mpsc::Receiver<(Bytes, std::net::SocketAddr)>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        let flow = DatagramFlow {
            source,
            destination,
            reader: Box::new(ChannelPacketRead { rx: inbound_rx }),
            writer: Box::new(ChannelPacketWrite { tx: outbound_tx }),
        };
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            handler.handle_datagram(flow).await;
        });
        (inbound_tx, outbound_rx)
    }
}

#[async_trait]
impl NetStack for MemoryStack {
    async fn start(&self) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PlatformError::stack_start_failed("mock failure injected"));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(tun) = self.tun.lock().take() {
            tun.close()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStack")
            .field("started", &self.is_started())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================
// Channel Packet Halves
// ============================================

struct ChannelPacketRead {
    rx: mpsc::Receiver<(Bytes, std::net::SocketAddr)>,
}

#[async_trait]
impl PacketRead for ChannelPacketRead {
    async fn recv(&mut self) -> std::io::Result<Option<(Bytes, std::net::SocketAddr)>> {
        Ok(self.rx.recv().await)
    }
}

struct ChannelPacketWrite {
    tx: mpsc::Sender<(Bytes, std::net::SocketAddr)>,
}

#[async_trait]
impl PacketWrite for ChannelPacketWrite {
    async fn send(
        &mut self,
        data: Bytes,
        source: std::net::SocketAddr,
    ) -> std::io::Result<()> {
        self.tx
            .send((data, source))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "association ended"))
    }
}

// ============================================
// MemoryStackProvider
// ============================================

/// Stack provider with failure injection for startup-rollback tests.
pub struct MemoryStackProvider {
    fail_build: AtomicBool,
    fail_start: AtomicBool,
    last_stack: Mutex<Option<Arc<MemoryStack>>>,
}

impl MemoryStackProvider {
    /// Creates a new provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_build: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            last_stack: Mutex::new(None),
        }
    }

    /// Makes the next `build` fail.
    pub fn set_fail_build(&self, fail: bool) {
        self.fail_build.store(fail, Ordering::SeqCst);
    }

    /// Makes the next built stack fail its `start`.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Returns the most recently built stack.
    #[must_use]
    pub fn last_stack(&self) -> Option<Arc<MemoryStack>> {
        self.last_stack.lock().clone()
    }
}

impl Default for MemoryStackProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StackProvider for MemoryStackProvider {
    fn build(&self, options: StackOptions) -> Result<Arc<dyn NetStack>> {
        if self.fail_build.load(Ordering::SeqCst) {
            // Dropping the options closes the descriptor they own.
            return Err(PlatformError::stack_build_failed("mock failure injected"));
        }
        let stack = Arc::new(MemoryStack::new(
            options,
            self.fail_start.load(Ordering::SeqCst),
        ));
        *self.last_stack.lock() = Some(Arc::clone(&stack));
        Ok(stack)
    }
}

// ============================================
// Tests
// ============================================
