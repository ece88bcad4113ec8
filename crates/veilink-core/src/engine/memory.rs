// ============================================
// File: crates/veilink-core/src/engine/memory.rs
// ============================================
//! # Memory Engine Implementation
//!
//! ## Creation Reason
//! Provides a channel-backed engine for testing the tun bridge and
//! command server without real outbound connectivity.
//!
//! ## Main Functionality
//! - Dispatch returns links wired to in-memory channels
//! - The far side of every link is exposed as a [`LinkPeer`] so tests
//!   can observe uploads and inject downloads
//! - Configurable failure injection (refuse dispatch, hang on close)
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - `set_hang_on_close` makes `close` never return; only use it to
//!   exercise the service shutdown timeout

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::engine::{Destination, DispatchContext, Link, LinkReader, LinkWriter, ProxyEngine};
use crate::error::{CoreError, Result};

/// Per-link channel capacity.
const LINK_CHANNEL_CAPACITY: usize = 64;

// ============================================
// LinkPeer
// ============================================

/// The engine-side end of a dispatched link, handed to tests.
pub struct LinkPeer {
    /// Context the bridge dispatched with.
    pub context: DispatchContext,
    /// Destination the bridge dispatched to.
    pub destination: Destination,
    /// Chunks the bridge uploaded (tunnel → engine).
    pub from_bridge: mpsc::Receiver<Bytes>,
    /// Inject chunks toward the bridge (engine → tunnel).
    pub to_bridge: mpsc::Sender<Bytes>,
}

// ============================================
// MemoryEngine
// ============================================

/// Channel-backed proxy engine for tests.
///
/// # Example
/// ```
/// use veilink_core::engine::{Destination, DispatchContext, MemoryEngine, ProxyEngine};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let engine = MemoryEngine::new();
/// engine.start().await.unwrap();
///
/// let dest = Destination::tcp("10.0.0.1:80".parse().unwrap());
/// let ctx = DispatchContext::for_tunnel_flow("172.19.0.2:4000".parse().unwrap(), &dest);
/// let _link = engine.dispatch(ctx, dest).await.unwrap();
///
/// let peer = engine.take_peer().unwrap();
/// assert_eq!(peer.destination, dest);
/// # }
/// ```
pub struct MemoryEngine {
    started: AtomicBool,
    closed: AtomicBool,
    refuse_dispatch: AtomicBool,
    hang_on_close: AtomicBool,
    dispatched: AtomicUsize,
    peers: Mutex<VecDeque<LinkPeer>>,
    live_links: Mutex<Vec<watch::Sender<bool>>>,
}

impl MemoryEngine {
    /// Creates a new memory engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            refuse_dispatch: AtomicBool::new(false),
            hang_on_close: AtomicBool::new(false),
            dispatched: AtomicUsize::new(0),
            peers: Mutex::new(VecDeque::new()),
            live_links: Mutex::new(Vec::new()),
        }
    }

    /// Makes every subsequent dispatch fail.
    pub fn set_refuse_dispatch(&self, refuse: bool) {
        self.refuse_dispatch.store(refuse, Ordering::SeqCst);
    }

    /// Makes `close` never return (shutdown-timeout testing).
    pub fn set_hang_on_close(&self, hang: bool) {
        self.hang_on_close.store(hang, Ordering::SeqCst);
    }

    /// Returns how many dispatches were attempted successfully.
    #[must_use]
    pub fn dispatch_count(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Takes the oldest unclaimed link peer, if any.
    #[must_use]
    pub fn take_peer(&self) -> Option<LinkPeer> {
        self.peers.lock().pop_front()
    }

    /// Returns `true` if `start` was called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns `true` if `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyEngine for MemoryEngine {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.hang_on_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.reset_connections().await;
        Ok(())
    }

    async fn dispatch(&self, context: DispatchContext, destination: Destination) -> Result<Link> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::EngineClosed);
        }
        if self.refuse_dispatch.load(Ordering::SeqCst) {
            return Err(CoreError::dispatch(
                destination.to_string(),
                "dispatch refused",
            ));
        }

        let (upload_tx, upload_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (download_tx, download_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);

        self.live_links.lock().push(close_tx);
        self.peers.lock().push_back(LinkPeer {
            context,
            destination,
            from_bridge: upload_rx,
            to_bridge: download_tx,
        });
        self.dispatched.fetch_add(1, Ordering::SeqCst);

        Ok(Link {
            reader: Box::new(ChannelReader {
                rx: download_rx,
                closed: close_rx,
            }),
            writer: Box::new(ChannelWriter {
                tx: Some(upload_tx),
            }),
        })
    }

    async fn reset_connections(&self) -> usize {
        let links = std::mem::take(&mut *self.live_links.lock());
        let count = links.len();
        for link in &links {
            let _ = link.send(true);
        }
        // Senders drop here; link readers observe end-of-link.
        count
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("started", &self.is_started())
            .field("closed", &self.is_closed())
            .field("dispatched", &self.dispatch_count())
            .finish()
    }
}

// ============================================
// Channel Link Endpoints
// ============================================

struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl LinkReader for ChannelReader {
    async fn recv(&mut self) -> std::io::Result<Option<Bytes>> {
        if *self.closed.borrow() {
            return Ok(None);
        }
        tokio::select! {
            changed = self.closed.changed() => {
                // A reset (or engine drop) terminates the link.
                let _ = changed;
                Ok(None)
            }
            chunk = self.rx.recv() => Ok(chunk),
        }
    }
}

struct ChannelWriter {
    tx: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl LinkWriter for ChannelWriter {
    async fn send(&mut self, data: Bytes) -> std::io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "link closed"))?;
        tx.send(data)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "link interrupted"))
    }

    async fn close(&mut self) -> std::io::Result<()> {
        self.tx.take();
        Ok(())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_destination() -> Destination {
        Destination::tcp("192.0.2.1:443".parse().unwrap())
    }

    fn test_context(dest: &Destination) -> DispatchContext {
        DispatchContext::for_tunnel_flow("172.19.0.2:5000".parse().unwrap(), dest)
    }

    #[tokio::test]
    async fn test_dispatch_wires_peer() {
        let engine = MemoryEngine::new();
        let dest = test_destination();
        let mut link = engine.dispatch(test_context(&dest), dest).await.unwrap();

        let mut peer = engine.take_peer().unwrap();
        assert_eq!(peer.destination, dest);

        link.writer.send(Bytes::from_static(b"up")).await.unwrap();
        assert_eq!(peer.from_bridge.recv().await.unwrap(), &b"up"[..]);

        peer.to_bridge
            .send(Bytes::from_static(b"down"))
            .await
            .unwrap();
        assert_eq!(link.reader.recv().await.unwrap().unwrap(), &b"down"[..]);
    }

    #[tokio::test]
    async fn test_refused_dispatch() {
        let engine = MemoryEngine::new();
        engine.set_refuse_dispatch(true);
        let dest = test_destination();
        let err = engine
            .dispatch(test_context(&dest), dest)
            .await
            .unwrap_err();
        assert!(err.is_engine_error());
        assert_eq!(engine.dispatch_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_terminates_links() {
        let engine = MemoryEngine::new();
        let dest = test_destination();
        let mut link = engine.dispatch(test_context(&dest), dest).await.unwrap();

        assert_eq!(engine.reset_connections().await, 1);
        assert!(link.reader.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_writer_reports_broken_pipe() {
        let engine = MemoryEngine::new();
        let dest = test_destination();
        let mut link = engine.dispatch(test_context(&dest), dest).await.unwrap();

        link.writer.close().await.unwrap();
        let err = link.writer.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_dispatch_after_close_fails() {
        let engine = MemoryEngine::new();
        engine.close().await.unwrap();
        let dest = test_destination();
        assert!(matches!(
            engine.dispatch(test_context(&dest), dest).await,
            Err(CoreError::EngineClosed)
        ));
    }
}
