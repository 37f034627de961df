//! Packet sockets and the connection server.
//!
//! A `PacketSocket` frames packets over TCP with optional negotiated zstd
//! stream compression. The `ConnectionServer` owns all post-handshake
//! client sockets and services them from a small pool of network worker
//! threads, delivering inbound packets through a callback and draining
//! per-client outbound queues.

use crate::error::{Result, ServerError};
use crate::packets::{CompressionMode, Packet, PacketType, MAX_PACKET_SIZE};
use log::{debug, warn};
use skyward_core::serialization::{DataReader, DataWriter};
use skyward_core::types::game::ConnectionId;
use skyward_core::types::time::monotonic_milliseconds;
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use zstd::stream::write::{Decoder as ZstdStreamDecoder, Encoder as ZstdStreamEncoder};

const ZSTD_COMPRESSION_LEVEL: i32 = 3;

/// A framed packet stream over one TCP connection.
///
/// With negotiated compression, one zstd encoder and decoder live as long
/// as the socket: every packet body flows through the same streaming
/// window, so later bodies compress against the connection's history.
pub struct PacketSocket {
    stream: TcpStream,
    compression: CompressionMode,
    buffer: Vec<u8>,
    compress_stream: Option<ZstdStreamEncoder<'static, Vec<u8>>>,
    decompress_stream: Option<ZstdStreamDecoder<'static, Vec<u8>>>,
}

impl std::fmt::Debug for PacketSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSocket")
            .field("stream", &self.stream)
            .field("compression", &self.compression)
            .finish()
    }
}

impl PacketSocket {
    pub fn open(stream: TcpStream) -> Result<PacketSocket> {
        stream
            .set_nodelay(true)
            .map_err(|e| ServerError::network(format!("set_nodelay failed: {e}")))?;
        Ok(PacketSocket {
            stream,
            compression: CompressionMode::None,
            buffer: Vec::new(),
            compress_stream: None,
            decompress_stream: None,
        })
    }

    /// Switches the negotiated compression mode, setting up the
    /// connection-lifetime compression streams.
    pub fn set_compression(&mut self, compression: CompressionMode) -> Result<()> {
        self.compression = compression;
        match compression {
            CompressionMode::None => {
                self.compress_stream = None;
                self.decompress_stream = None;
            }
            CompressionMode::Zstd => {
                if self.compress_stream.is_none() {
                    self.compress_stream = Some(
                        ZstdStreamEncoder::new(Vec::new(), ZSTD_COMPRESSION_LEVEL).map_err(
                            |e| ServerError::network(format!("zstd stream init failed: {e}")),
                        )?,
                    );
                }
                if self.decompress_stream.is_none() {
                    self.decompress_stream = Some(ZstdStreamDecoder::new(Vec::new()).map_err(
                        |e| ServerError::network(format!("zstd stream init failed: {e}")),
                    )?);
                }
            }
        }
        Ok(())
    }

    pub fn remote_address(&self) -> Option<std::net::IpAddr> {
        self.stream.peer_addr().ok().map(|a| a.ip())
    }

    /// Writes packets immediately. Body size is a signed VLQ; negative
    /// marks a body carried on the compression stream.
    pub fn send_packets(&mut self, packets: &[Packet]) -> Result<()> {
        let mut out = DataWriter::new();
        for packet in packets {
            let mut body = DataWriter::new();
            packet.write_body(&mut body)?;
            let body = body.into_bytes();

            out.write_u8(packet.packet_type() as u8);
            match &mut self.compress_stream {
                Some(stream) => {
                    stream
                        .write_all(&body)
                        .and_then(|_| stream.flush())
                        .map_err(|e| {
                            ServerError::network(format!("zstd encode failed: {e}"))
                        })?;
                    let compressed = std::mem::take(stream.get_mut());
                    out.write_vlq_i(-(compressed.len() as i64));
                    out.write_bytes(&compressed);
                }
                None => {
                    out.write_vlq_i(body.len() as i64);
                    out.write_bytes(&body);
                }
            }
        }

        self.stream
            .write_all(&out.into_bytes())
            .map_err(|e| ServerError::network(format!("send failed: {e}")))?;
        Ok(())
    }

    /// Waits up to `timeout` for inbound data, then parses every complete
    /// frame available. Returns an empty list on timeout.
    pub fn receive_packets(&mut self, timeout: Duration) -> Result<Vec<Packet>> {
        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(|e| ServerError::network(format!("set_read_timeout failed: {e}")))?;

        let mut chunk = [0u8; 8192];
        match self.stream.read(&mut chunk) {
            Ok(0) => return Err(ServerError::network("connection closed by peer")),
            Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(ServerError::network(format!("receive failed: {e}"))),
        }

        self.parse_frames()
    }

    fn parse_frames(&mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        while let Some((size_len, body_size, compressed)) = self.next_frame_bounds()? {
            let packet_type = PacketType::from_u8(self.buffer[0])?;
            let total = 1 + size_len + body_size;
            let body: Vec<u8> = self.buffer[1 + size_len..total].to_vec();
            self.buffer.drain(..total);

            // Compressed bodies must pass through the connection's decode
            // stream in arrival order to keep the shared window in sync
            let body = if compressed {
                let Some(stream) = &mut self.decompress_stream else {
                    return Err(ServerError::protocol(
                        "compressed packet without negotiated compression",
                    ));
                };
                stream
                    .write_all(&body)
                    .and_then(|_| stream.flush())
                    .map_err(|e| ServerError::protocol(format!("zstd decode failed: {e}")))?;
                std::mem::take(stream.get_mut())
            } else {
                body
            };

            let mut reader = DataReader::new(&body);
            packets.push(Packet::read_body(packet_type, &mut reader)?);
        }
        Ok(packets)
    }

    /// `(size_prefix_len, body_size, compressed)` of the next frame, when
    /// one is complete in the buffer.
    fn next_frame_bounds(&self) -> Result<Option<(usize, usize, bool)>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        PacketType::from_u8(self.buffer[0])?;

        // Scan the VLQ size without consuming
        let mut size_len = 0usize;
        let mut raw: u64 = 0;
        loop {
            let index = 1 + size_len;
            if index >= self.buffer.len() {
                return Ok(None);
            }
            let byte = self.buffer[index];
            raw |= u64::from(byte & 0x7f) << (7 * size_len as u32);
            size_len += 1;
            if byte & 0x80 == 0 {
                break;
            }
            if size_len >= 10 {
                return Err(ServerError::protocol("oversized packet length prefix"));
            }
        }
        let signed = ((raw >> 1) as i64) ^ -((raw & 1) as i64);
        let (body_size, compressed) = if signed < 0 {
            ((-signed) as usize, true)
        } else {
            (signed as usize, false)
        };
        if body_size > MAX_PACKET_SIZE {
            return Err(ServerError::protocol(format!(
                "packet of {body_size} bytes exceeds limit"
            )));
        }

        let total = 1 + size_len + body_size;
        if self.buffer.len() < total {
            return Ok(None);
        }
        Ok(Some((size_len, body_size, compressed)))
    }
}

/// A connection during the handshake: a socket plus a small inbox.
pub struct Connection {
    socket: PacketSocket,
    received: VecDeque<Packet>,
}

impl Connection {
    pub fn new(socket: PacketSocket) -> Connection {
        Connection {
            socket,
            received: VecDeque::new(),
        }
    }

    pub fn remote_address(&self) -> Option<std::net::IpAddr> {
        self.socket.remote_address()
    }

    pub fn set_compression(&mut self, compression: CompressionMode) -> Result<()> {
        self.socket.set_compression(compression)
    }

    pub fn send(&mut self, packet: Packet) -> Result<()> {
        self.socket.send_packets(&[packet])
    }

    /// Blocks until at least one packet arrives or the timeout elapses.
    pub fn receive_any(&mut self, timeout_millis: u64) -> Result<()> {
        let deadline = monotonic_milliseconds() + timeout_millis as i64;
        while self.received.is_empty() {
            let remaining = deadline - monotonic_milliseconds();
            if remaining <= 0 {
                return Ok(());
            }
            let packets = self
                .socket
                .receive_packets(Duration::from_millis(remaining.min(50) as u64))?;
            self.received.extend(packets);
        }
        Ok(())
    }

    pub fn pull_single(&mut self) -> Option<Packet> {
        self.received.pop_front()
    }

    pub fn into_socket(self) -> PacketSocket {
        self.socket
    }
}

struct ClientChannel {
    socket: PacketSocket,
    outgoing: VecDeque<Packet>,
    last_activity: i64,
    dead: bool,
}

type PacketsReceived = Arc<dyn Fn(ConnectionId, Vec<Packet>) + Send + Sync>;

/// Owns every post-handshake client socket. Network workers round-robin
/// the connections, flushing outbound queues and delivering inbound
/// packets through the callback.
pub struct ConnectionServer {
    channels: Mutex<HashMap<ConnectionId, Arc<Mutex<ClientChannel>>>>,
    on_packets: PacketsReceived,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionServer {
    pub fn new(on_packets: PacketsReceived) -> Arc<ConnectionServer> {
        Arc::new(ConnectionServer {
            channels: Mutex::new(HashMap::new()),
            on_packets,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn start_workers(self: &Arc<Self>, count: usize) {
        let mut workers = self.workers.lock().unwrap();
        for i in 0..count.max(1) {
            let server = self.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("net-worker-{i}"))
                    .spawn(move || server.worker_loop())
                    .expect("failed to spawn network worker"),
            );
        }
    }

    fn worker_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            let channels: Vec<(ConnectionId, Arc<Mutex<ClientChannel>>)> = {
                let map = self.channels.lock().unwrap();
                map.iter().map(|(id, c)| (*id, c.clone())).collect()
            };

            for (client_id, channel) in channels {
                let mut channel = match channel.try_lock() {
                    Ok(guard) => guard,
                    Err(_) => continue,
                };
                if channel.dead {
                    continue;
                }
                if let Err(e) = Self::service_channel(client_id, &mut channel, &self.on_packets) {
                    debug!("connection {client_id} errored: {e}");
                    channel.dead = true;
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn service_channel(
        client_id: ConnectionId,
        channel: &mut ClientChannel,
        on_packets: &PacketsReceived,
    ) -> Result<()> {
        if !channel.outgoing.is_empty() {
            let packets: Vec<Packet> = channel.outgoing.drain(..).collect();
            channel.socket.send_packets(&packets)?;
        }
        let received = channel.socket.receive_packets(Duration::from_millis(1))?;
        if !received.is_empty() {
            channel.last_activity = monotonic_milliseconds();
            on_packets(client_id, received);
        }
        Ok(())
    }

    pub fn add_connection(&self, client_id: ConnectionId, socket: PacketSocket) {
        let mut channels = self.channels.lock().unwrap();
        channels.insert(
            client_id,
            Arc::new(Mutex::new(ClientChannel {
                socket,
                outgoing: VecDeque::new(),
                last_activity: monotonic_milliseconds(),
                dead: false,
            })),
        );
    }

    /// Flushes remaining packets and drops the connection.
    pub fn remove_connection(&self, client_id: ConnectionId) {
        let channel = self.channels.lock().unwrap().remove(&client_id);
        if let Some(channel) = channel {
            let mut channel = channel.lock().unwrap();
            if !channel.dead && !channel.outgoing.is_empty() {
                let packets: Vec<Packet> = channel.outgoing.drain(..).collect();
                if let Err(e) = channel.socket.send_packets(&packets) {
                    warn!("final flush for connection {client_id} failed: {e}");
                }
            }
        }
    }

    /// Queues packets for delivery; false when the client is unknown.
    pub fn send_packets(&self, client_id: ConnectionId, packets: Vec<Packet>) -> bool {
        let channel = {
            let channels = self.channels.lock().unwrap();
            channels.get(&client_id).cloned()
        };
        match channel {
            Some(channel) => {
                channel.lock().unwrap().outgoing.extend(packets);
                true
            }
            None => false,
        }
    }

    pub fn connection_alive(&self, client_id: ConnectionId) -> bool {
        let channels = self.channels.lock().unwrap();
        channels
            .get(&client_id)
            .is_some_and(|c| !c.lock().unwrap().dead)
    }

    /// Milliseconds since the last inbound packet.
    pub fn idle_time(&self, client_id: ConnectionId) -> Option<i64> {
        let channels = self.channels.lock().unwrap();
        channels
            .get(&client_id)
            .map(|c| monotonic_milliseconds() - c.lock().unwrap().last_activity)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.channels.lock().unwrap().keys().copied().collect()
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut workers = self.workers.lock().unwrap();
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn socket_pair() -> (PacketSocket, PacketSocket) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (
            PacketSocket::open(client).unwrap(),
            PacketSocket::open(server).unwrap(),
        )
    }

    fn receive_one(socket: &mut PacketSocket) -> Packet {
        for _ in 0..100 {
            let mut packets = socket.receive_packets(Duration::from_millis(10)).unwrap();
            if let Some(packet) = packets.pop() {
                return packet;
            }
        }
        panic!("no packet arrived");
    }

    #[test]
    fn packets_cross_a_socket() {
        let (mut a, mut b) = socket_pair();
        a.send_packets(&[Packet::ProtocolRequest {
            protocol_version: 12,
        }])
        .unwrap();
        assert_eq!(
            receive_one(&mut b),
            Packet::ProtocolRequest {
                protocol_version: 12
            }
        );
    }

    fn receive_count(socket: &mut PacketSocket, count: usize) -> Vec<Packet> {
        let mut received = Vec::new();
        for _ in 0..200 {
            received.extend(socket.receive_packets(Duration::from_millis(10)).unwrap());
            if received.len() >= count {
                return received;
            }
        }
        panic!("only {} of {count} packets arrived", received.len());
    }

    #[test]
    fn compressed_stream_round_trips_across_packets() {
        let (mut a, mut b) = socket_pair();
        a.set_compression(CompressionMode::Zstd).unwrap();
        b.set_compression(CompressionMode::Zstd).unwrap();

        let reason = "x".repeat(2000);
        a.send_packets(&[Packet::ServerDisconnect {
            reason: reason.clone(),
        }])
        .unwrap();
        assert_eq!(
            receive_one(&mut b),
            Packet::ServerDisconnect {
                reason: reason.clone()
            }
        );

        // Later packets decode through the same stream history
        a.send_packets(&[
            Packet::ServerDisconnect {
                reason: reason.clone(),
            },
            Packet::UniverseTimeUpdate { universe_time: 9.0 },
        ])
        .unwrap();
        let received = receive_count(&mut b, 2);
        assert_eq!(received[0], Packet::ServerDisconnect { reason });
        assert_eq!(
            received[1],
            Packet::UniverseTimeUpdate { universe_time: 9.0 }
        );
    }

    #[test]
    fn compressed_frames_require_negotiation() {
        let (mut a, mut b) = socket_pair();
        a.set_compression(CompressionMode::Zstd).unwrap();
        a.send_packets(&[Packet::ServerDisconnect {
            reason: "bye".into(),
        }])
        .unwrap();

        let mut rejected = false;
        for _ in 0..100 {
            match b.receive_packets(Duration::from_millis(10)) {
                Ok(packets) if packets.is_empty() => continue,
                Ok(_) => break,
                Err(_) => {
                    rejected = true;
                    break;
                }
            }
        }
        assert!(rejected, "un-negotiated compressed frame is a protocol error");
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        let (mut a, mut b) = socket_pair();
        // Manually write a split frame: type byte first, body later.
        let mut body = DataWriter::new();
        Packet::UniverseTimeUpdate {
            universe_time: 4.5,
        }
        .write_body(&mut body)
        .unwrap();
        let body = body.into_bytes();

        let mut head = DataWriter::new();
        head.write_u8(PacketType::UniverseTimeUpdate as u8);
        head.write_vlq_i(body.len() as i64);
        a.stream.write_all(&head.into_bytes()).unwrap();

        assert!(b
            .receive_packets(Duration::from_millis(10))
            .unwrap()
            .is_empty());

        a.stream.write_all(&body).unwrap();
        assert_eq!(
            receive_one(&mut b),
            Packet::UniverseTimeUpdate { universe_time: 4.5 }
        );
    }
}
