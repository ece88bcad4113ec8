// ============================================
// File: crates/veilink-service/src/bridge/packet.rs
// ============================================
//! # Datagram Copy Pairs and Packet-Address Encoding
//!
//! ## Creation Reason
//! Runs the copy pair of a UDP association: the raw packet connection
//! is wrapped so reads and writes translate between the stack's
//! per-packet addresses and the engine link's datagram chunks.
//!
//! ## Packet-Address Mode
//! For destinations that multiplex one association across peers, the
//! peer address can be encoded inline in each payload:
//! ```text
//! [atyp u8: 1=v4, 2=v6][address 4|16 bytes][port u16 BE][payload]
//! ```
//! The mode is a configurable policy point and disabled by default;
//! when off, downloads are attributed to the association's primary
//! destination.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Port bytes are big-endian here (socket convention), unlike the
//!   little-endian control frames
//! - A malformed inline address fails only that flow, never the stack

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::sync::broadcast;
use tracing::debug;

use veilink_common::types::Network;
use veilink_core::engine::Link;
use veilink_platform::stack::DatagramFlow;

use crate::bridge::flow::FlowTable;

// ============================================
// Packet-Address Codec
// ============================================

/// Address type byte for IPv4.
const ATYP_V4: u8 = 1;
/// Address type byte for IPv6.
const ATYP_V6: u8 = 2;

/// Prefixes `payload` with the encoded peer address.
pub(crate) fn encode_packet_address(peer: SocketAddr, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 16 + 2 + payload.len());
    match peer.ip() {
        IpAddr::V4(addr) => {
            buf.put_u8(ATYP_V4);
            buf.put_slice(&addr.octets());
        }
        IpAddr::V6(addr) => {
            buf.put_u8(ATYP_V6);
            buf.put_slice(&addr.octets());
        }
    }
    buf.put_u16(peer.port());
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits an inline-addressed chunk into payload and peer address.
pub(crate) fn decode_packet_address(mut chunk: Bytes) -> std::io::Result<(Bytes, SocketAddr)> {
    let malformed = || std::io::Error::new(std::io::ErrorKind::InvalidData, "bad packet address");
    if chunk.is_empty() {
        return Err(malformed());
    }
    let ip = match chunk.get_u8() {
        ATYP_V4 => {
            if chunk.len() < 4 + 2 {
                return Err(malformed());
            }
            let mut octets = [0u8; 4];
            chunk.copy_to_slice(&mut octets);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        ATYP_V6 => {
            if chunk.len() < 16 + 2 {
                return Err(malformed());
            }
            let mut octets = [0u8; 16];
            chunk.copy_to_slice(&mut octets);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(malformed()),
    };
    let port = chunk.get_u16();
    Ok((chunk, SocketAddr::new(ip, port)))
}

// ============================================
// Datagram Copy Pair
// ============================================

/// Runs the copy pair of one UDP association until either direction
/// ends, then cleans up exactly once.
pub(crate) async fn run_datagram_flow(
    flow: DatagramFlow,
    link: Link,
    table: Arc<FlowTable>,
    mut shutdown: broadcast::Receiver<()>,
    packet_address: bool,
) {
    let _guard = table.register(flow.source, flow.destination, Network::Udp);
    let DatagramFlow {
        source,
        destination,
        reader: mut raw_reader,
        writer: mut raw_writer,
    } = flow;
    let Link {
        mut reader,
        mut writer,
    } = link;
    let traffic = &table.traffic;

    let upload = async {
        loop {
            match raw_reader.recv().await? {
                None => {
                    writer.close().await?;
                    return Ok::<_, std::io::Error>(());
                }
                Some((payload, peer)) => {
                    traffic.record_uplink(payload.len() as u64);
                    let chunk = if packet_address {
                        encode_packet_address(peer, &payload)
                    } else {
                        payload
                    };
                    writer.send(chunk).await?;
                }
            }
        }
    };

    let download = async {
        loop {
            match reader.recv().await? {
                None => return Ok::<_, std::io::Error>(()),
                Some(chunk) => {
                    let (payload, from) = if packet_address {
                        decode_packet_address(chunk)?
                    } else {
                        (chunk, destination)
                    };
                    traffic.record_downlink(payload.len() as u64);
                    raw_writer.send(payload, from).await?;
                }
            }
        }
    };

    let (direction, result) = tokio::select! {
        result = upload => ("upload", result),
        result = download => ("download", result),
        _ = shutdown.recv() => ("shutdown", Ok(())),
    };
    if let Err(e) = result {
        debug!(
            "packet flow {} -> {} {} ended: {}",
            source, destination, direction, e
        );
    }

    // Single-shot cleanup: dropping the raw halves ends the
    // association; closing the link writer interrupts the engine side.
    let _ = writer.close().await;
    drop(reader);
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use veilink_core::engine::{Destination, DispatchContext, MemoryEngine, ProxyEngine};
    use veilink_platform::stack::{PacketRead, PacketWrite};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_packet_address_v4_vector() {
        let peer = addr("1.2.3.4:53");
        let encoded = encode_packet_address(peer, b"query");
        assert_eq!(&encoded[..7], &[ATYP_V4, 1, 2, 3, 4, 0, 53]);
        assert_eq!(&encoded[7..], b"query");

        let (payload, decoded) = decode_packet_address(encoded).unwrap();
        assert_eq!(&payload[..], b"query");
        assert_eq!(decoded, peer);
    }

    #[test]
    fn test_packet_address_v6_roundtrip() {
        let peer = addr("[fdfe:dcba:9876::1]:8853");
        let encoded = encode_packet_address(peer, b"x");
        assert_eq!(encoded[0], ATYP_V6);
        assert_eq!(encoded.len(), 1 + 16 + 2 + 1);

        let (payload, decoded) = decode_packet_address(encoded).unwrap();
        assert_eq!(&payload[..], b"x");
        assert_eq!(decoded, peer);
    }

    #[test]
    fn test_packet_address_malformed() {
        assert!(decode_packet_address(Bytes::new()).is_err());
        assert!(decode_packet_address(Bytes::from_static(&[9, 0, 0])).is_err());
        assert!(decode_packet_address(Bytes::from_static(&[ATYP_V4, 1, 2])).is_err());
        assert!(decode_packet_address(Bytes::from_static(&[ATYP_V6, 0, 0, 0])).is_err());
    }

    struct TestPacketRead {
        rx: mpsc::Receiver<(Bytes, SocketAddr)>,
    }

    #[async_trait::async_trait]
    impl PacketRead for TestPacketRead {
        async fn recv(&mut self) -> std::io::Result<Option<(Bytes, SocketAddr)>> {
            Ok(self.rx.recv().await)
        }
    }

    struct TestPacketWrite {
        tx: mpsc::Sender<(Bytes, SocketAddr)>,
    }

    #[async_trait::async_trait]
    impl PacketWrite for TestPacketWrite {
        async fn send(&mut self, data: Bytes, source: SocketAddr) -> std::io::Result<()> {
            self.tx.send((data, source)).await.map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "association ended")
            })
        }
    }

    struct DatagramHarness {
        engine: MemoryEngine,
        inbound: mpsc::Sender<(Bytes, SocketAddr)>,
        outbound: mpsc::Receiver<(Bytes, SocketAddr)>,
        table: Arc<FlowTable>,
        pump: tokio::task::JoinHandle<()>,
        _shutdown: broadcast::Sender<()>,
    }

    async fn start_flow(packet_address: bool) -> DatagramHarness {
        let engine = MemoryEngine::new();
        let destination = Destination::udp(addr("9.9.9.9:53"));
        let link = engine
            .dispatch(
                DispatchContext::for_tunnel_flow(addr("172.19.0.2:40000"), &destination),
                destination,
            )
            .await
            .unwrap();

        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let flow = DatagramFlow {
            source: addr("172.19.0.2:40000"),
            destination: addr("9.9.9.9:53"),
            reader: Box::new(TestPacketRead { rx: inbound_rx }),
            writer: Box::new(TestPacketWrite { tx: outbound_tx }),
        };

        let table = Arc::new(FlowTable::new());
        let (shutdown_tx, _) = broadcast::channel(1);
        let pump = tokio::spawn(run_datagram_flow(
            flow,
            link,
            Arc::clone(&table),
            shutdown_tx.subscribe(),
            packet_address,
        ));

        DatagramHarness {
            engine,
            inbound: inbound_tx,
            outbound: outbound_rx,
            table,
            pump,
            _shutdown: shutdown_tx,
        }
    }

    #[tokio::test]
    async fn test_datagram_pair_translates_addresses() {
        let mut harness = start_flow(false).await;
        let mut peer = harness.engine.take_peer().unwrap();

        // Tunnel → engine: payload forwarded as-is.
        harness
            .inbound
            .send((Bytes::from_static(b"query"), addr("9.9.9.9:53")))
            .await
            .unwrap();
        assert_eq!(peer.from_bridge.recv().await.unwrap(), &b"query"[..]);

        // Engine → tunnel: attributed to the primary destination.
        peer.to_bridge
            .send(Bytes::from_static(b"answer"))
            .await
            .unwrap();
        let (payload, from) = harness.outbound.recv().await.unwrap();
        assert_eq!(&payload[..], b"answer");
        assert_eq!(from, addr("9.9.9.9:53"));

        assert_eq!(harness.table.traffic.uplink_bytes(), 5);
        assert_eq!(harness.table.traffic.downlink_bytes(), 6);

        drop(peer);
        tokio::time::timeout(Duration::from_secs(1), harness.pump)
            .await
            .expect("pair must terminate")
            .unwrap();
        assert!(harness.table.is_empty());
    }

    #[tokio::test]
    async fn test_datagram_pair_packet_address_mode() {
        let mut harness = start_flow(true).await;
        let mut peer = harness.engine.take_peer().unwrap();

        // Uploads carry the inline peer address.
        harness
            .inbound
            .send((Bytes::from_static(b"q"), addr("8.8.8.8:53")))
            .await
            .unwrap();
        let uploaded = peer.from_bridge.recv().await.unwrap();
        let (payload, peer_addr) = decode_packet_address(uploaded).unwrap();
        assert_eq!(&payload[..], b"q");
        assert_eq!(peer_addr, addr("8.8.8.8:53"));

        // Downloads are attributed to the decoded inline address.
        peer.to_bridge
            .send(encode_packet_address(addr("8.8.4.4:53"), b"a"))
            .await
            .unwrap();
        let (payload, from) = harness.outbound.recv().await.unwrap();
        assert_eq!(&payload[..], b"a");
        assert_eq!(from, addr("8.8.4.4:53"));

        drop(peer);
        let _ = tokio::time::timeout(Duration::from_secs(1), harness.pump).await;
    }

    #[tokio::test]
    async fn test_malformed_inline_address_fails_flow_only() {
        let mut harness = start_flow(true).await;
        let peer = harness.engine.take_peer().unwrap();

        peer.to_bridge
            .send(Bytes::from_static(&[0xff, 0x00]))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), harness.pump)
            .await
            .expect("malformed address must end the flow")
            .unwrap();
        assert!(harness.table.is_empty());
    }
}
