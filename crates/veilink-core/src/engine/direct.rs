// ============================================
// File: crates/veilink-core/src/engine/direct.rs
// ============================================
//! # Direct Engine Implementation
//!
//! ## Creation Reason
//! The simplest possible engine: every destination is connected directly
//! over the host network, with no proxying. Used by the CLI host and as
//! the reference implementation of the engine seam.
//!
//! ## Main Functionality
//! - TCP dispatch via `tokio::net::TcpStream`
//! - UDP dispatch via a connected `tokio::net::UdpSocket`
//! - Link tracking so `reset_connections` can interrupt live flows
//!
//! ## ⚠️ Important Note for Next Developer
//! - Outbound sockets here are NOT interface-bound; with auto-route
//!   enabled the host platform must exclude this process from the
//!   tunnel or dispatches will loop back into it

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tracing::debug;

use veilink_common::types::Network;

use crate::engine::{Destination, DispatchContext, Link, LinkReader, LinkWriter, ProxyEngine};
use crate::error::{CoreError, Result};

/// Read chunk size for stream links.
const STREAM_CHUNK_SIZE: usize = 16 * 1024;

/// Receive buffer size for datagram links.
const DATAGRAM_BUFFER_SIZE: usize = 65535;

// ============================================
// DirectEngine
// ============================================

/// Engine adapter that connects every destination directly.
pub struct DirectEngine {
    closed: AtomicBool,
    next_link_id: AtomicU64,
    links: Arc<DashMap<u64, watch::Sender<bool>>>,
}

impl DirectEngine {
    /// Creates a new direct engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            next_link_id: AtomicU64::new(0),
            links: Arc::new(DashMap::new()),
        }
    }

    /// Returns the number of currently tracked links.
    #[must_use]
    pub fn active_links(&self) -> usize {
        self.links.len()
    }

    fn register_link(&self) -> (u64, watch::Receiver<bool>) {
        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        self.links.insert(id, tx);
        (id, rx)
    }
}

impl Default for DirectEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyEngine for DirectEngine {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let interrupted = self.reset_connections().await;
        if interrupted > 0 {
            debug!("direct engine closed, {} links interrupted", interrupted);
        }
        Ok(())
    }

    async fn dispatch(&self, context: DispatchContext, destination: Destination) -> Result<Link> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::EngineClosed);
        }
        debug!(
            source = %context.source,
            destination = %destination,
            "direct dispatch"
        );

        match destination.network {
            Network::Tcp => {
                let stream = TcpStream::connect(destination.addr)
                    .await
                    .map_err(|e| CoreError::dispatch(destination.to_string(), e.to_string()))?;
                let (read_half, write_half) = stream.into_split();
                let (id, close_rx) = self.register_link();
                Ok(Link {
                    reader: Box::new(TcpLinkReader {
                        half: read_half,
                        closed: close_rx,
                        _guard: LinkGuard {
                            id,
                            links: Arc::clone(&self.links),
                        },
                    }),
                    writer: Box::new(TcpLinkWriter {
                        half: Some(write_half),
                    }),
                })
            }
            Network::Udp => {
                let bind_addr = if destination.addr.is_ipv4() {
                    "0.0.0.0:0"
                } else {
                    "[::]:0"
                };
                let socket = UdpSocket::bind(bind_addr)
                    .await
                    .map_err(|e| CoreError::dispatch(destination.to_string(), e.to_string()))?;
                socket
                    .connect(destination.addr)
                    .await
                    .map_err(|e| CoreError::dispatch(destination.to_string(), e.to_string()))?;
                let socket = Arc::new(socket);
                let (id, close_rx) = self.register_link();
                Ok(Link {
                    reader: Box::new(UdpLinkReader {
                        socket: Arc::clone(&socket),
                        closed: close_rx,
                        _guard: LinkGuard {
                            id,
                            links: Arc::clone(&self.links),
                        },
                    }),
                    writer: Box::new(UdpLinkWriter { socket }),
                })
            }
        }
    }

    async fn reset_connections(&self) -> usize {
        let ids: Vec<u64> = self.links.iter().map(|entry| *entry.key()).collect();
        let count = ids.len();
        for id in ids {
            if let Some((_, tx)) = self.links.remove(&id) {
                let _ = tx.send(true);
            }
        }
        count
    }
}

impl std::fmt::Debug for DirectEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectEngine")
            .field("active_links", &self.active_links())
            .finish()
    }
}

// ============================================
// Link Bookkeeping
// ============================================

/// Removes the link's interrupt handle when its reader is dropped.
struct LinkGuard {
    id: u64,
    links: Arc<DashMap<u64, watch::Sender<bool>>>,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.links.remove(&self.id);
    }
}

// ============================================
// TCP Link Endpoints
// ============================================

struct TcpLinkReader {
    half: OwnedReadHalf,
    closed: watch::Receiver<bool>,
    _guard: LinkGuard,
}

#[async_trait]
impl LinkReader for TcpLinkReader {
    async fn recv(&mut self) -> std::io::Result<Option<Bytes>> {
        if *self.closed.borrow() {
            return Ok(None);
        }
        let mut buf = BytesMut::with_capacity(STREAM_CHUNK_SIZE);
        tokio::select! {
            changed = self.closed.changed() => {
                let _ = changed;
                Ok(None)
            }
            read = self.half.read_buf(&mut buf) => {
                let n = read?;
                if n == 0 {
                    Ok(None)
                } else {
                    Ok(Some(buf.freeze()))
                }
            }
        }
    }
}

struct TcpLinkWriter {
    half: Option<OwnedWriteHalf>,
}

#[async_trait]
impl LinkWriter for TcpLinkWriter {
    async fn send(&mut self, data: Bytes) -> std::io::Result<()> {
        let half = self
            .half
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "link closed"))?;
        half.write_all(&data).await
    }

    async fn close(&mut self) -> std::io::Result<()> {
        if let Some(mut half) = self.half.take() {
            half.shutdown().await?;
        }
        Ok(())
    }
}

// ============================================
// UDP Link Endpoints
// ============================================

struct UdpLinkReader {
    socket: Arc<UdpSocket>,
    closed: watch::Receiver<bool>,
    _guard: LinkGuard,
}

#[async_trait]
impl LinkReader for UdpLinkReader {
    async fn recv(&mut self) -> std::io::Result<Option<Bytes>> {
        if *self.closed.borrow() {
            return Ok(None);
        }
        let mut buf = vec![0u8; DATAGRAM_BUFFER_SIZE];
        tokio::select! {
            changed = self.closed.changed() => {
                let _ = changed;
                Ok(None)
            }
            received = self.socket.recv(&mut buf) => {
                let n = received?;
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
        }
    }
}

struct UdpLinkWriter {
    socket: Arc<UdpSocket>,
}

#[async_trait]
impl LinkWriter for UdpLinkWriter {
    async fn send(&mut self, data: Bytes) -> std::io::Result<()> {
        self.socket.send(&data).await.map(|_| ())
    }

    async fn close(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_dispatch_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = conn.read(&mut buf).await.unwrap();
            conn.write_all(&buf[..n]).await.unwrap();
        });

        let engine = DirectEngine::new();
        let dest = Destination::tcp(addr);
        let ctx = DispatchContext::for_tunnel_flow("172.19.0.2:4000".parse().unwrap(), &dest);
        let mut link = engine.dispatch(ctx, dest).await.unwrap();

        link.writer.send(Bytes::from_static(b"ping")).await.unwrap();
        let reply = link.reader.recv().await.unwrap().unwrap();
        assert_eq!(&reply[..], b"ping");
    }

    #[tokio::test]
    async fn test_tcp_dispatch_refused() {
        // Bind then drop to get an address nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = DirectEngine::new();
        let dest = Destination::tcp(addr);
        let ctx = DispatchContext::for_tunnel_flow("172.19.0.2:4000".parse().unwrap(), &dest);
        let err = engine.dispatch(ctx, dest).await.unwrap_err();
        assert!(err.is_engine_error());
    }

    #[tokio::test]
    async fn test_reset_interrupts_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection open without writing.
            let (_conn, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let engine = DirectEngine::new();
        let dest = Destination::tcp(addr);
        let ctx = DispatchContext::for_tunnel_flow("172.19.0.2:4000".parse().unwrap(), &dest);
        let mut link = engine.dispatch(ctx, dest).await.unwrap();
        assert_eq!(engine.active_links(), 1);

        let reader = tokio::spawn(async move { link.reader.recv().await });
        assert_eq!(engine.reset_connections().await, 1);
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), reader)
            .await
            .expect("reader must be interrupted")
            .unwrap();
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_udp_dispatch_echo() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&buf[..n], peer).await.unwrap();
        });

        let engine = DirectEngine::new();
        let dest = Destination::udp(addr);
        let ctx = DispatchContext::for_tunnel_flow("172.19.0.2:4000".parse().unwrap(), &dest);
        let mut link = engine.dispatch(ctx, dest).await.unwrap();

        link.writer
            .send(Bytes::from_static(b"datagram"))
            .await
            .unwrap();
        let reply = link.reader.recv().await.unwrap().unwrap();
        assert_eq!(&reply[..], b"datagram");
    }
}
