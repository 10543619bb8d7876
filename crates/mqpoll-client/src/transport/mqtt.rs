//! Non-blocking MQTT 3.1.1 transport over TCP, driven by mio.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{TcpStream as StdTcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, trace, warn};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use mqpoll_core::packet::{
    decode_packet, encode_packet, Connack, Connect, Packet, Publish, QoS, Subscribe, Unsubscribe,
};

use crate::bridge::Callbacks;
use crate::packet_id::PacketIdAllocator;
use crate::status::Status;
use crate::transport::{Outcome, Transport};

const SOCKET: Token = Token(0);
const DEFAULT_BUFFER_SIZE: usize = 8192;
const READ_CHUNK: usize = 4096;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    /// CONNECT queued, waiting for CONNACK.
    Connecting,
    Connected,
    /// CONNACK refused. The socket is closed and I/O steps are no-ops
    /// until the next connect or disconnect.
    Refused,
}

/// Where an outbound QoS > 0 publish is in its flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outbound {
    AwaitingPuback,
    AwaitingPubrec,
    AwaitingPubcomp,
}

/// MQTT transport over a non-blocking TCP socket.
pub struct MqttTransport {
    client_id: String,
    clean_session: bool,
    connect_timeout: Duration,
    tls: bool,
    max_packet_size: usize,
    username: Option<String>,
    password: Option<String>,
    state: ConnectionState,
    poll: Poll,
    events: Events,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    /// Total bytes ever queued / written, used to tell when a QoS 0 publish left.
    queued_total: u64,
    flushed_total: u64,
    unflushed_qos0: VecDeque<(u64, u16)>,
    packet_ids: PacketIdAllocator,
    outbound: HashMap<u16, Outbound>,
    inbound_qos2: HashMap<u16, Publish>,
    keepalive: Duration,
    last_out: Instant,
    last_in: Instant,
    ping_sent: Option<Instant>,
}

impl MqttTransport {
    /// Create a transport. Fails only if the OS refuses a poll instance.
    pub fn new(client_id: impl Into<String>, clean_session: bool) -> io::Result<Self> {
        let now = Instant::now();
        Ok(Self {
            client_id: client_id.into(),
            clean_session,
            connect_timeout: Duration::from_secs(10),
            tls: false,
            max_packet_size: 0,
            username: None,
            password: None,
            state: ConnectionState::Disconnected,
            poll: Poll::new()?,
            events: Events::with_capacity(16),
            stream: None,
            read_buf: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            write_buf: Vec::with_capacity(DEFAULT_BUFFER_SIZE),
            queued_total: 0,
            flushed_total: 0,
            unflushed_qos0: VecDeque::new(),
            packet_ids: PacketIdAllocator::new(),
            outbound: HashMap::new(),
            inbound_qos2: HashMap::new(),
            keepalive: Duration::ZERO,
            last_out: now,
            last_in: now,
            ping_sent: None,
        })
    }

    /// Set the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Require TLS. Connecting then fails with `Status::NotSupported`.
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Reject inbound packets larger than `bytes` (0 = no limit).
    pub fn max_packet_size(mut self, bytes: usize) -> Self {
        self.max_packet_size = bytes;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Number of QoS > 0 publishes awaiting acknowledgement.
    pub fn inflight_count(&self) -> usize {
        self.outbound.len()
    }

    fn require_stream(&self) -> Outcome {
        match self.stream {
            Some(_) => Ok(()),
            None => Err(Status::NoConn),
        }
    }

    fn queue(&mut self, packet: &Packet) {
        let before = self.write_buf.len();
        encode_packet(packet, &mut self.write_buf);
        self.queued_total += (self.write_buf.len() - before) as u64;
    }

    fn open_socket(&mut self, host: &str, port: u16) -> Outcome<TcpStream> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| Status::Eai)?
            .next()
            .ok_or(Status::Eai)?;

        let std_stream = StdTcpStream::connect_timeout(&addr, self.connect_timeout)?;
        std_stream.set_nonblocking(true)?;
        std_stream.set_nodelay(true)?;

        let mut stream = TcpStream::from_std(std_stream);
        self.poll
            .registry()
            .register(&mut stream, SOCKET, Interest::READABLE)?;
        Ok(stream)
    }

    fn handle_packet(&mut self, packet: Packet, callbacks: &mut dyn Callbacks) -> Outcome {
        trace!("Received {:?}", packet);

        match packet {
            Packet::Connack(connack) => self.handle_connack(connack, callbacks),
            Packet::Publish(publish) => {
                self.handle_publish(publish, callbacks);
                Ok(())
            }
            Packet::Puback { packet_id } => {
                if self.outbound.get(&packet_id) == Some(&Outbound::AwaitingPuback) {
                    self.complete_publish(packet_id, callbacks);
                }
                Ok(())
            }
            Packet::Pubrec { packet_id } => {
                if let Some(state) = self.outbound.get_mut(&packet_id) {
                    *state = Outbound::AwaitingPubcomp;
                }
                // PUBREL is sent even for unknown ids so the broker can finish
                self.queue(&Packet::Pubrel { packet_id });
                Ok(())
            }
            Packet::Pubrel { packet_id } => {
                self.queue(&Packet::Pubcomp { packet_id });
                if let Some(publish) = self.inbound_qos2.remove(&packet_id) {
                    callbacks.on_message(
                        &publish.topic,
                        publish.payload,
                        publish.qos,
                        publish.retain,
                    );
                }
                Ok(())
            }
            Packet::Pubcomp { packet_id } => {
                if self.outbound.get(&packet_id) == Some(&Outbound::AwaitingPubcomp) {
                    self.complete_publish(packet_id, callbacks);
                }
                Ok(())
            }
            Packet::Suback(suback) => {
                self.packet_ids.release(suback.packet_id);
                callbacks.on_subscribe(suback.packet_id, &suback.return_codes);
                Ok(())
            }
            Packet::Unsuback { packet_id } => {
                self.packet_ids.release(packet_id);
                callbacks.on_unsubscribe(packet_id);
                Ok(())
            }
            Packet::Pingresp => {
                self.ping_sent = None;
                Ok(())
            }
            _ => Err(Status::Protocol),
        }
    }

    fn handle_connack(&mut self, connack: Connack, callbacks: &mut dyn Callbacks) -> Outcome {
        if self.state != ConnectionState::Connecting {
            return Err(Status::Protocol);
        }
        callbacks.on_connect(connack.code);

        if connack.code == 0 {
            debug!(
                "Connected as {} (session present: {})",
                self.client_id, connack.session_present
            );
            self.state = ConnectionState::Connected;
        } else {
            debug!("Connection refused with code {}", connack.code);
            self.cleanup();
            self.state = ConnectionState::Refused;
        }
        Ok(())
    }

    fn handle_publish(&mut self, publish: Publish, callbacks: &mut dyn Callbacks) {
        match (publish.qos, publish.packet_id) {
            (QoS::AtLeastOnce, Some(packet_id)) => {
                self.queue(&Packet::Puback { packet_id });
                callbacks.on_message(&publish.topic, publish.payload, publish.qos, publish.retain);
            }
            (QoS::ExactlyOnce, Some(packet_id)) => {
                self.queue(&Packet::Pubrec { packet_id });
                self.inbound_qos2.entry(packet_id).or_insert(publish);
            }
            _ => {
                callbacks.on_message(&publish.topic, publish.payload, publish.qos, publish.retain);
            }
        }
    }

    fn complete_publish(&mut self, packet_id: u16, callbacks: &mut dyn Callbacks) {
        self.outbound.remove(&packet_id);
        self.packet_ids.release(packet_id);
        callbacks.on_publish(packet_id);
    }

    fn parse_packets(&mut self, callbacks: &mut dyn Callbacks) -> Outcome {
        while !self.read_buf.is_empty() {
            match decode_packet(&self.read_buf, self.max_packet_size) {
                Ok(Some((packet, consumed))) => {
                    let _ = self.read_buf.split_to(consumed);
                    self.handle_packet(packet, callbacks)?;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Dropping connection after malformed packet: {}", e);
                    return Err(Status::Protocol);
                }
            }
        }
        Ok(())
    }

    /// Tear down on a fatal error, passing the status through.
    fn fail(&mut self, status: Status) -> Status {
        if status == Status::ConnLost {
            warn!("Connection lost");
        }
        self.cleanup();
        status
    }

    fn cleanup(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = self.poll.registry().deregister(&mut stream);
        }
        self.state = ConnectionState::Disconnected;
        self.read_buf.clear();
        self.write_buf.clear();
        self.unflushed_qos0.clear();
        self.flushed_total = self.queued_total;
        self.ping_sent = None;
    }
}

impl Transport for MqttTransport {
    fn set_credentials(&mut self, username: Option<&str>, password: Option<&str>) -> Outcome {
        if password.is_some() && username.is_none() {
            return Err(Status::Inval);
        }
        self.username = username.map(str::to_string);
        self.password = password.map(str::to_string);
        Ok(())
    }

    fn connect(&mut self, host: &str, port: u16, keepalive: u16) -> Outcome {
        if self.tls {
            return Err(Status::NotSupported);
        }
        if self.stream.is_some() {
            debug!("Reconnecting to {}:{}", host, port);
            self.cleanup();
        }
        if self.clean_session {
            self.packet_ids.clear();
            self.outbound.clear();
            self.inbound_qos2.clear();
        }

        let stream = self.open_socket(host, port)?;
        self.stream = Some(stream);
        self.state = ConnectionState::Connecting;
        self.keepalive = Duration::from_secs(keepalive as u64);

        let connect = Connect {
            clean_session: self.clean_session,
            keep_alive: keepalive,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone().map(String::into_bytes),
        };
        self.queue(&Packet::Connect(connect));

        let now = Instant::now();
        self.last_out = now;
        self.last_in = now;
        Ok(())
    }

    fn disconnect(&mut self) -> Outcome {
        if self.state == ConnectionState::Refused {
            self.state = ConnectionState::Disconnected;
            return Ok(());
        }
        self.require_stream()?;

        self.queue(&Packet::Disconnect);
        if let Some(ref mut stream) = self.stream {
            let _ = stream.write_all(&self.write_buf);
        }
        self.cleanup();
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Outcome<u16> {
        self.require_stream()?;
        let packet_id = self.packet_ids.allocate().ok_or(Status::NoMem)?;
        self.queue(&Packet::Subscribe(Subscribe {
            packet_id,
            topics: vec![(topic.to_string(), qos)],
        }));
        Ok(packet_id)
    }

    fn unsubscribe(&mut self, topic: &str) -> Outcome<u16> {
        self.require_stream()?;
        let packet_id = self.packet_ids.allocate().ok_or(Status::NoMem)?;
        self.queue(&Packet::Unsubscribe(Unsubscribe {
            packet_id,
            topics: vec![topic.to_string()],
        }));
        Ok(packet_id)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Outcome<u16> {
        self.require_stream()?;
        if payload.len() > mqpoll_core::varint::MAX_VALUE.saturating_sub(topic.len() + 4) {
            return Err(Status::PayloadSize);
        }
        let packet_id = self.packet_ids.allocate().ok_or(Status::NoMem)?;

        self.queue(&Packet::Publish(Publish {
            dup: false,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id: Some(packet_id),
            payload: bytes::Bytes::copy_from_slice(payload),
        }));

        match qos {
            QoS::AtMostOnce => self.unflushed_qos0.push_back((self.queued_total, packet_id)),
            QoS::AtLeastOnce => {
                self.outbound.insert(packet_id, Outbound::AwaitingPuback);
            }
            QoS::ExactlyOnce => {
                self.outbound.insert(packet_id, Outbound::AwaitingPubrec);
            }
        }
        Ok(packet_id)
    }

    fn wants_to_write(&self) -> bool {
        self.stream.is_some() && !self.write_buf.is_empty()
    }

    fn flush_writes(&mut self, callbacks: &mut dyn Callbacks) -> Outcome {
        if self.state == ConnectionState::Refused {
            return Ok(());
        }
        let Some(ref mut stream) = self.stream else {
            return Err(Status::NoConn);
        };

        let mut written = 0;
        let mut failure = None;
        while written < self.write_buf.len() {
            match stream.write(&self.write_buf[written..]) {
                Ok(0) => {
                    failure = Some(Status::ConnLost);
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(Status::from(e));
                    break;
                }
            }
        }
        if let Some(status) = failure {
            return Err(self.fail(status));
        }

        if written > 0 {
            self.write_buf.drain(..written);
            self.flushed_total += written as u64;
            self.last_out = Instant::now();
        }

        while let Some(&(end, packet_id)) = self.unflushed_qos0.front() {
            if end > self.flushed_total {
                break;
            }
            self.unflushed_qos0.pop_front();
            self.packet_ids.release(packet_id);
            callbacks.on_publish(packet_id);
        }
        Ok(())
    }

    fn read_available(&mut self, callbacks: &mut dyn Callbacks) -> Outcome {
        if self.state == ConnectionState::Refused {
            return Ok(());
        }
        let Some(ref mut stream) = self.stream else {
            return Err(Status::NoConn);
        };

        let mut buf = [0u8; READ_CHUNK];
        let mut received = false;
        let mut failure = None;
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    failure = Some(Status::ConnLost);
                    break;
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&buf[..n]);
                    received = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(Status::from(e));
                    break;
                }
            }
        }

        if received {
            self.last_in = Instant::now();
        }

        // Packets that arrived before a close are still delivered
        if let Err(status) = self.parse_packets(callbacks) {
            return Err(self.fail(status));
        }
        if self.state == ConnectionState::Refused {
            return Ok(());
        }
        match failure {
            Some(status) => Err(self.fail(status)),
            None => Ok(()),
        }
    }

    fn perform_periodic_maintenance(&mut self, _callbacks: &mut dyn Callbacks) -> Outcome {
        if self.state == ConnectionState::Refused {
            return Ok(());
        }
        self.require_stream()?;
        if self.keepalive.is_zero() {
            return Ok(());
        }

        let now = Instant::now();
        if let Some(sent) = self.ping_sent {
            if now.duration_since(sent) >= self.keepalive {
                warn!("No PINGRESP within {:?}", self.keepalive);
                return Err(self.fail(Status::ConnLost));
            }
            return Ok(());
        }

        let idle_out = now.duration_since(self.last_out);
        let idle_in = now.duration_since(self.last_in);
        if self.state == ConnectionState::Connected
            && (idle_out >= self.keepalive || idle_in >= self.keepalive)
        {
            trace!("Sending PINGREQ");
            self.queue(&Packet::Pingreq);
            self.ping_sent = Some(now);
            self.last_out = now;
            self.last_in = now;
        }
        Ok(())
    }

    fn wait_readable(&mut self, timeout: Duration) -> bool {
        if self.stream.is_none() {
            std::thread::sleep(timeout);
            return false;
        }

        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            return poll_failed(e, timeout);
        }

        self.events.iter().any(|event| {
            event.token() == SOCKET
                && (event.is_readable() || event.is_read_closed() || event.is_error())
        })
    }

    fn destroy(&mut self) {
        if self.stream.is_some() {
            let _ = self.disconnect();
        }
        self.packet_ids.clear();
        self.outbound.clear();
        self.inbound_qos2.clear();
    }
}

/// A failed poll still waits out `timeout` so callers looping on it do not spin.
fn poll_failed(e: io::Error, timeout: Duration) -> bool {
    if e.kind() != io::ErrorKind::Interrupted {
        warn!("Poll failed: {}", e);
        std::thread::sleep(timeout);
    }
    false
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if self.stream.is_some() {
            let _ = self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream as StdStream};
    use std::sync::mpsc;
    use std::thread;

    use bytes::Bytes;

    use super::*;
    use crate::bridge::Bridge;
    use crate::events::Event;

    /// Read one raw packet (fixed header included) from a blocking stream.
    fn read_raw(stream: &mut StdStream) -> Vec<u8> {
        let mut packet = vec![0u8; 1];
        stream.read_exact(&mut packet).unwrap();
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let mut b = [0u8; 1];
            stream.read_exact(&mut b).unwrap();
            packet.push(b[0]);
            len |= ((b[0] & 0x7F) as usize) << shift;
            shift += 7;
            if b[0] & 0x80 == 0 {
                break;
            }
        }
        let start = packet.len();
        packet.resize(start + len, 0);
        stream.read_exact(&mut packet[start..]).unwrap();
        packet
    }

    /// Accept one client, answer CONNECT with `connack_code`, then run `script`.
    fn fake_broker<F>(connack_code: u8, script: F) -> (u16, thread::JoinHandle<()>)
    where
        F: FnOnce(&mut StdStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let connect = read_raw(&mut stream);
            assert_eq!(connect[0], 0x10);
            stream.write_all(&[0x20, 2, 0, connack_code]).unwrap();
            script(&mut stream);
        });
        (port, handle)
    }

    fn pump_until(transport: &mut MqttTransport, bridge: &mut Bridge, count: usize) -> Outcome {
        let deadline = Instant::now() + Duration::from_secs(5);
        while bridge.queue().len() < count && Instant::now() < deadline {
            while transport.wants_to_write() {
                transport.flush_writes(&mut *bridge)?;
            }
            if transport.wait_readable(Duration::from_millis(50)) {
                transport.read_available(&mut *bridge)?;
            }
        }
        Ok(())
    }

    fn connected(port: u16) -> (MqttTransport, Bridge) {
        let mut transport = MqttTransport::new("test-client", true).unwrap();
        let mut bridge = Bridge::new();
        transport.connect("127.0.0.1", port, 30).unwrap();
        pump_until(&mut transport, &mut bridge, 1).unwrap();
        assert_eq!(bridge.queue.pop_front(), Some(Event::connect(0)));
        assert!(transport.is_connected());
        (transport, bridge)
    }

    #[test]
    fn test_operations_without_connection() {
        let mut transport = MqttTransport::new("idle", true).unwrap();
        let mut bridge = Bridge::new();
        assert_eq!(transport.disconnect(), Err(Status::NoConn));
        assert_eq!(transport.subscribe("t", QoS::AtMostOnce), Err(Status::NoConn));
        assert_eq!(transport.read_available(&mut bridge), Err(Status::NoConn));
        assert_eq!(
            transport.perform_periodic_maintenance(&mut bridge),
            Err(Status::NoConn)
        );
        assert!(!transport.wants_to_write());
        assert!(!transport.wait_readable(Duration::ZERO));
    }

    #[test]
    fn test_tls_not_supported() {
        let mut transport = MqttTransport::new("tls", true).unwrap().tls(true);
        assert_eq!(
            transport.connect("127.0.0.1", 8883, 30),
            Err(Status::NotSupported)
        );
    }

    #[test]
    fn test_connect_refused_by_broker() {
        let (port, broker) = fake_broker(5, |_| {});
        let mut transport = MqttTransport::new("refused", true).unwrap();
        let mut bridge = Bridge::new();
        transport.connect("127.0.0.1", port, 30).unwrap();
        pump_until(&mut transport, &mut bridge, 1).unwrap();

        assert_eq!(bridge.queue.pop_front(), Some(Event::connect(5)));
        assert!(!transport.is_connected());
        assert_eq!(transport.perform_periodic_maintenance(&mut bridge), Ok(()));
        assert_eq!(transport.subscribe("t", QoS::AtMostOnce), Err(Status::NoConn));
        assert_eq!(transport.disconnect(), Ok(()));
        assert_eq!(transport.disconnect(), Err(Status::NoConn));
        broker.join().unwrap();
    }

    #[test]
    fn test_subscribe_ack_correlates() {
        let (port, broker) = fake_broker(0, |stream| {
            let subscribe = read_raw(stream);
            assert_eq!(subscribe[0], 0x82);
            let id = [subscribe[2], subscribe[3]];
            stream.write_all(&[0x90, 3, id[0], id[1], 0]).unwrap();
            let _ = read_raw(stream); // DISCONNECT
        });

        let (mut transport, mut bridge) = connected(port);
        let id = transport.subscribe("a/#", QoS::AtMostOnce).unwrap();
        pump_until(&mut transport, &mut bridge, 1).unwrap();
        assert_eq!(
            bridge.queue.pop_front(),
            Some(Event::Subscribe { packet_id: id })
        );

        transport.disconnect().unwrap();
        broker.join().unwrap();
    }

    #[test]
    fn test_qos0_publish_acked_when_flushed() {
        let (port, broker) = fake_broker(0, |stream| {
            let publish = read_raw(stream);
            assert_eq!(publish[0], 0x30);
            let _ = read_raw(stream);
        });

        let (mut transport, mut bridge) = connected(port);
        let id = transport.publish("t", b"hello", QoS::AtMostOnce, false).unwrap();
        assert!(bridge.queue().is_empty());
        transport.flush_writes(&mut bridge).unwrap();
        assert_eq!(bridge.queue.pop_front(), Some(Event::Publish { packet_id: id }));

        transport.disconnect().unwrap();
        broker.join().unwrap();
    }

    #[test]
    fn test_qos2_round_trip() {
        let (port, broker) = fake_broker(0, |stream| {
            // Outbound QoS 2: PUBLISH -> PUBREC -> PUBREL -> PUBCOMP
            let publish = read_raw(stream);
            assert_eq!(publish[0] & 0xF6, 0x34);
            let id = [publish[5], publish[6]];
            stream.write_all(&[0x50, 2, id[0], id[1]]).unwrap();
            let pubrel = read_raw(stream);
            assert_eq!(pubrel, [0x62, 2, id[0], id[1]]);
            stream.write_all(&[0x70, 2, id[0], id[1]]).unwrap();

            // Inbound QoS 2: PUBLISH -> PUBREC -> PUBREL -> PUBCOMP
            stream
                .write_all(&[0x34, 7, 0, 1, b'x', 0, 9, b'h', b'i'])
                .unwrap();
            assert_eq!(read_raw(stream), [0x50, 2, 0, 9]);
            stream.write_all(&[0x62, 2, 0, 9]).unwrap();
            assert_eq!(read_raw(stream), [0x70, 2, 0, 9]);
            let _ = read_raw(stream);
        });

        let (mut transport, mut bridge) = connected(port);
        let id = transport.publish("q", b"p", QoS::ExactlyOnce, false).unwrap();
        assert_eq!(transport.inflight_count(), 1);
        pump_until(&mut transport, &mut bridge, 1).unwrap();
        assert_eq!(bridge.queue.pop_front(), Some(Event::Publish { packet_id: id }));
        assert_eq!(transport.inflight_count(), 0);

        pump_until(&mut transport, &mut bridge, 1).unwrap();
        assert_eq!(
            bridge.queue.pop_front(),
            Some(Event::Message {
                topic: "x".into(),
                payload: Bytes::from_static(b"hi"),
                retained: false,
                qos: QoS::ExactlyOnce,
            })
        );
        // flush the PUBCOMP before disconnecting
        transport.flush_writes(&mut bridge).unwrap();

        transport.disconnect().unwrap();
        broker.join().unwrap();
    }

    #[test]
    fn test_peer_close_is_connection_lost() {
        let (close_tx, close_rx) = mpsc::channel::<()>();
        let (port, broker) = fake_broker(0, move |_| {
            let _ = close_rx.recv();
        });
        let (mut transport, mut bridge) = connected(port);
        close_tx.send(()).unwrap();
        broker.join().unwrap();

        let result = pump_until(&mut transport, &mut bridge, 1);
        assert_eq!(result, Err(Status::ConnLost));
        assert_eq!(transport.disconnect(), Err(Status::NoConn));
    }

    #[test]
    fn test_qos1_round_trip() {
        let (port, broker) = fake_broker(0, |stream| {
            let publish = read_raw(stream);
            assert_eq!(publish[0] & 0xF6, 0x32);
            let id = [publish[5], publish[6]];
            stream.write_all(&[0x40, 2, id[0], id[1]]).unwrap();

            stream
                .write_all(&[0x32, 7, 0, 1, b'x', 0, 7, b'h', b'i'])
                .unwrap();
            assert_eq!(read_raw(stream), [0x40, 2, 0, 7]);
            let _ = read_raw(stream);
        });

        let (mut transport, mut bridge) = connected(port);
        let id = transport.publish("q", b"p", QoS::AtLeastOnce, false).unwrap();
        assert_eq!(transport.inflight_count(), 1);
        pump_until(&mut transport, &mut bridge, 1).unwrap();
        assert_eq!(bridge.queue.pop_front(), Some(Event::Publish { packet_id: id }));
        assert_eq!(transport.inflight_count(), 0);

        pump_until(&mut transport, &mut bridge, 1).unwrap();
        assert_eq!(
            bridge.queue.pop_front(),
            Some(Event::Message {
                topic: "x".into(),
                payload: Bytes::from_static(b"hi"),
                retained: false,
                qos: QoS::AtLeastOnce,
            })
        );
        transport.flush_writes(&mut bridge).unwrap();

        transport.disconnect().unwrap();
        broker.join().unwrap();
    }

    #[test]
    fn test_keepalive_sends_pingreq_and_drops_unanswered() {
        let (close_tx, close_rx) = mpsc::channel::<()>();
        let (port, broker) = fake_broker(0, move |stream| {
            assert_eq!(read_raw(stream), [0xC0, 0]);
            let _ = close_rx.recv();
        });

        let mut transport = MqttTransport::new("keepalive", true).unwrap();
        let mut bridge = Bridge::new();
        transport.connect("127.0.0.1", port, 1).unwrap();
        pump_until(&mut transport, &mut bridge, 1).unwrap();
        assert_eq!(bridge.queue.pop_front(), Some(Event::connect(0)));

        // nothing due before the keepalive elapses
        transport.perform_periodic_maintenance(&mut bridge).unwrap();
        assert!(!transport.wants_to_write());

        thread::sleep(Duration::from_millis(1100));
        transport.perform_periodic_maintenance(&mut bridge).unwrap();
        assert!(transport.wants_to_write());
        transport.flush_writes(&mut bridge).unwrap();

        thread::sleep(Duration::from_millis(1100));
        assert_eq!(
            transport.perform_periodic_maintenance(&mut bridge),
            Err(Status::ConnLost)
        );
        assert!(!transport.is_connected());
        assert_eq!(transport.disconnect(), Err(Status::NoConn));

        close_tx.send(()).unwrap();
        broker.join().unwrap();
    }

    #[test]
    fn test_failed_poll_waits_out_timeout() {
        let begin = Instant::now();
        assert!(!poll_failed(io::Error::other("poll broke"), Duration::from_millis(100)));
        assert!(begin.elapsed() >= Duration::from_millis(100));

        let begin = Instant::now();
        let interrupted = io::Error::from(io::ErrorKind::Interrupted);
        assert!(!poll_failed(interrupted, Duration::from_secs(5)));
        assert!(begin.elapsed() < Duration::from_secs(5));
    }
}
