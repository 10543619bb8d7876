//! MQTT 3.1.1 packet types and the client-side codec.
//!
//! Packets a client sends (CONNECT, PUBLISH, SUBSCRIBE, ...) are encoded;
//! packets a broker sends (CONNACK, PUBLISH, SUBACK, ...) are decoded.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::varint;

/// Protocol level byte for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// SUBACK return code signalling a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// MQTT Control Packet Types (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)] // MQTT spec names
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket(format!(
                "Invalid QoS: {}",
                value
            ))),
        }
    }
}

/// CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnackCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernamePassword = 4,
    NotAuthorized = 5,
}

impl ConnackCode {
    /// Map a raw return code. Codes outside 0-5 are reserved.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(ConnackCode::Accepted),
            1 => Some(ConnackCode::UnacceptableProtocolVersion),
            2 => Some(ConnackCode::IdentifierRejected),
            3 => Some(ConnackCode::ServerUnavailable),
            4 => Some(ConnackCode::BadUsernamePassword),
            5 => Some(ConnackCode::NotAuthorized),
            _ => None,
        }
    }
}

/// MQTT Packets exchanged between a client and a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback { packet_id: u16 },
    Pubrec { packet_id: u16 },
    Pubrel { packet_id: u16 },
    Pubcomp { packet_id: u16 },
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback { packet_id: u16 },
    Pingreq,
    Pingresp,
    Disconnect,
}

/// CONNECT packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

/// CONNACK packet data. `code` is kept raw so reserved codes reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connack {
    pub session_present: bool,
    pub code: u8,
}

/// PUBLISH packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

/// SUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topics: Vec<(String, QoS)>,
}

/// SUBACK packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suback {
    pub packet_id: u16,
    /// 0x00-0x02 = granted QoS, 0x80 = failure.
    pub return_codes: Vec<u8>,
}

/// UNSUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

/// Cursor over a packet body.
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::IncompletePacket {
                needed: len,
                have: self.remaining(),
            }
            .into());
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        // MQTT-1.5.3-2: UTF-8 string MUST NOT contain null character U+0000
        if bytes.contains(&0u8) {
            return Err(ProtocolError::MalformedPacket(
                "UTF-8 string must not contain null character".into(),
            )
            .into());
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }
}

/// Try to decode one complete broker-to-client packet from the buffer.
///
/// Returns `Ok(Some((packet, bytes_consumed)))` if successful,
/// `Ok(None)` if more data is needed, or `Err` on protocol errors.
/// `max_packet_size` of 0 disables the size check.
pub fn decode_packet(buf: &[u8], max_packet_size: usize) -> Result<Option<(Packet, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let fixed_header = buf[0];
    let packet_type_raw = fixed_header >> 4;
    let flags = fixed_header & 0x0F;

    let Some((remaining_len, len_bytes)) = varint::decode(&buf[1..])? else {
        return Ok(None);
    };

    let header_len = 1 + len_bytes;
    let total_len = header_len + remaining_len;

    if max_packet_size > 0 && total_len > max_packet_size {
        return Err(ProtocolError::MalformedPacket(format!(
            "packet of {} bytes exceeds limit of {}",
            total_len, max_packet_size
        ))
        .into());
    }

    if buf.len() < total_len {
        return Ok(None);
    }

    let packet_type = PacketType::try_from(packet_type_raw)?;
    let body = &buf[header_len..total_len];

    // MQTT-3.6.1-1: PUBREL fixed header flags MUST be 0010
    if packet_type == PacketType::Pubrel && flags != 0x02 {
        return Err(ProtocolError::MalformedPacket(format!(
            "PUBREL fixed header flags must be 0x02, got {:#04x}",
            flags
        ))
        .into());
    }

    let packet = match packet_type {
        PacketType::Connack => decode_connack(body)?,
        PacketType::Publish => decode_publish(flags, body)?,
        PacketType::Puback => Packet::Puback {
            packet_id: decode_packet_id(body)?,
        },
        PacketType::Pubrec => Packet::Pubrec {
            packet_id: decode_packet_id(body)?,
        },
        PacketType::Pubrel => Packet::Pubrel {
            packet_id: decode_packet_id(body)?,
        },
        PacketType::Pubcomp => Packet::Pubcomp {
            packet_id: decode_packet_id(body)?,
        },
        PacketType::Suback => decode_suback(body)?,
        PacketType::Unsuback => Packet::Unsuback {
            packet_id: decode_packet_id(body)?,
        },
        PacketType::Pingresp => Packet::Pingresp,
        other => {
            return Err(ProtocolError::UnexpectedPacket(format!("{:?}", other)).into());
        }
    };

    Ok(Some((packet, total_len)))
}

fn decode_connack(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let ack_flags = dec.read_u8()?;
    let code = dec.read_u8()?;
    Ok(Packet::Connack(Connack {
        session_present: ack_flags & 0x01 != 0,
        code,
    }))
}

fn decode_publish(flags: u8, body: &[u8]) -> Result<Packet> {
    let dup = (flags & 0x08) != 0;
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let retain = (flags & 0x01) != 0;

    let mut dec = Decoder::new(body);
    let topic = dec.read_string()?;
    let packet_id = if qos != QoS::AtMostOnce {
        Some(dec.read_u16()?)
    } else {
        None
    };

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload: Bytes::copy_from_slice(dec.rest()),
    }))
}

fn decode_packet_id(body: &[u8]) -> Result<u16> {
    Decoder::new(body).read_u16()
}

fn decode_suback(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_u16()?;
    let return_codes = dec.rest().to_vec();
    if return_codes.is_empty() {
        return Err(ProtocolError::MalformedPacket("SUBACK without return codes".into()).into());
    }
    Ok(Packet::Suback(Suback {
        packet_id,
        return_codes,
    }))
}

/// Encode a client-to-broker packet, appending to `buf`.
///
/// Broker-only packets (CONNACK, SUBACK, UNSUBACK, PINGRESP) are never sent
/// by a client and encode to nothing.
pub fn encode_packet(packet: &Packet, buf: &mut Vec<u8>) {
    match packet {
        Packet::Connect(connect) => encode_connect(connect, buf),
        Packet::Publish(publish) => encode_publish(publish, buf),
        Packet::Puback { packet_id } => encode_simple_ack(PacketType::Puback, 0, *packet_id, buf),
        Packet::Pubrec { packet_id } => encode_simple_ack(PacketType::Pubrec, 0, *packet_id, buf),
        Packet::Pubrel { packet_id } => {
            encode_simple_ack(PacketType::Pubrel, 0x02, *packet_id, buf)
        }
        Packet::Pubcomp { packet_id } => {
            encode_simple_ack(PacketType::Pubcomp, 0, *packet_id, buf)
        }
        Packet::Subscribe(subscribe) => encode_subscribe(subscribe, buf),
        Packet::Unsubscribe(unsubscribe) => encode_unsubscribe(unsubscribe, buf),
        Packet::Pingreq => encode_empty(PacketType::Pingreq, buf),
        Packet::Disconnect => encode_empty(PacketType::Disconnect, buf),
        Packet::Connack(_) | Packet::Suback(_) | Packet::Unsuback { .. } | Packet::Pingresp => {}
    }
}

fn encode_empty(packet_type: PacketType, buf: &mut Vec<u8>) {
    buf.push((packet_type as u8) << 4);
    buf.push(0);
}

fn encode_simple_ack(packet_type: PacketType, flags: u8, packet_id: u16, buf: &mut Vec<u8>) {
    buf.push(((packet_type as u8) << 4) | flags);
    buf.push(2);
    buf.extend_from_slice(&packet_id.to_be_bytes());
}

fn put_str(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn encode_connect(connect: &Connect, buf: &mut Vec<u8>) {
    let mut body = Vec::with_capacity(16 + connect.client_id.len());

    put_str(b"MQTT", &mut body);
    body.push(PROTOCOL_LEVEL);

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= 0x02;
    }
    if connect.password.is_some() {
        flags |= 0x40;
    }
    if connect.username.is_some() {
        flags |= 0x80;
    }
    body.push(flags);
    body.extend_from_slice(&connect.keep_alive.to_be_bytes());

    put_str(connect.client_id.as_bytes(), &mut body);
    if let Some(ref username) = connect.username {
        put_str(username.as_bytes(), &mut body);
    }
    if let Some(ref password) = connect.password {
        put_str(password, &mut body);
    }

    buf.push((PacketType::Connect as u8) << 4);
    varint::encode(body.len(), buf);
    buf.extend_from_slice(&body);
}

fn encode_publish(publish: &Publish, buf: &mut Vec<u8>) {
    let mut fixed_header = (PacketType::Publish as u8) << 4;
    if publish.dup {
        fixed_header |= 0x08;
    }
    fixed_header |= (publish.qos as u8) << 1;
    if publish.retain {
        fixed_header |= 0x01;
    }
    buf.push(fixed_header);

    let packet_id_len = if publish.qos != QoS::AtMostOnce { 2 } else { 0 };
    let remaining = 2 + publish.topic.len() + packet_id_len + publish.payload.len();
    varint::encode(remaining, buf);

    put_str(publish.topic.as_bytes(), buf);
    if publish.qos != QoS::AtMostOnce {
        buf.extend_from_slice(&publish.packet_id.unwrap_or_default().to_be_bytes());
    }
    buf.extend_from_slice(&publish.payload);
}

fn encode_subscribe(subscribe: &Subscribe, buf: &mut Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(&subscribe.packet_id.to_be_bytes());
    for (topic, qos) in &subscribe.topics {
        put_str(topic.as_bytes(), &mut body);
        body.push(*qos as u8);
    }

    // Fixed header (flags must be 0x02)
    buf.push(((PacketType::Subscribe as u8) << 4) | 0x02);
    varint::encode(body.len(), buf);
    buf.extend_from_slice(&body);
}

fn encode_unsubscribe(unsubscribe: &Unsubscribe, buf: &mut Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(&unsubscribe.packet_id.to_be_bytes());
    for topic in &unsubscribe.topics {
        put_str(topic.as_bytes(), &mut body);
    }

    // Fixed header (flags must be 0x02)
    buf.push(((PacketType::Unsubscribe as u8) << 4) | 0x02);
    varint::encode(body.len(), buf);
    buf.extend_from_slice(&body);
}
