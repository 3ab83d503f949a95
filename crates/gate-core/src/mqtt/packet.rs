//! MQTT 3.1.1 packet encoding and decoding.
//!
//! Outgoing packets are built into a `heapless::Vec` sized for the largest
//! frame the client ever sends. Incoming packets are parsed in place from the
//! client's receive buffer.

use heapless::Vec;
use thiserror_no_std::Error;

/// Capacity of an outgoing frame
pub const FRAME_CAPACITY: usize = 128;

pub type Frame = Vec<u8, FRAME_CAPACITY>;

/// Largest value the 4-byte remaining-length field can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;

/// Control packet types used by the client (upper nibble of the fixed header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    Subscribe = 8,
    SubAck = 9,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Decodes the packet type from a fixed-header byte
    pub const fn from_header(header: u8) -> Option<Self> {
        match header >> 4 {
            1 => Some(Self::Connect),
            2 => Some(Self::ConnAck),
            3 => Some(Self::Publish),
            4 => Some(Self::PubAck),
            8 => Some(Self::Subscribe),
            9 => Some(Self::SubAck),
            12 => Some(Self::PingReq),
            13 => Some(Self::PingResp),
            14 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame does not fit in the output buffer")]
    BufferTooSmall,
    #[error("remaining length is malformed")]
    InvalidRemainingLength,
    #[error("packet body is truncated")]
    Truncated,
    #[error("invalid QoS bits")]
    InvalidQoS,
    #[error("topic is not valid UTF-8")]
    InvalidTopic,
}

/// An inbound application message, borrowed from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub packet_id: Option<u16>,
    pub retain: bool,
}

/// Encodes `len` as an MQTT variable-length integer into `out`, returning the
/// number of bytes written.
pub fn encode_remaining_length(mut len: usize, out: &mut [u8; 4]) -> Result<usize, PacketError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(PacketError::InvalidRemainingLength);
    }

    let mut i = 0;
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out[i] = byte;
        i += 1;
        if len == 0 {
            return Ok(i);
        }
    }
}

/// Incremental decoder for the remaining-length field, fed one byte at a time
/// as it comes off the wire.
#[derive(Debug)]
pub struct RemainingLength {
    value: usize,
    multiplier: usize,
    bytes: u8,
}

impl RemainingLength {
    pub const fn new() -> Self {
        Self {
            value: 0,
            multiplier: 1,
            bytes: 0,
        }
    }

    /// Feeds the next byte. Returns the decoded length once the final byte
    /// has been seen.
    pub fn push(&mut self, byte: u8) -> Result<Option<usize>, PacketError> {
        if self.bytes == 4 {
            return Err(PacketError::InvalidRemainingLength);
        }
        self.value += usize::from(byte & 0x7F) * self.multiplier;
        self.multiplier *= 128;
        self.bytes += 1;

        if byte & 0x80 == 0 {
            Ok(Some(self.value))
        } else if self.bytes == 4 {
            Err(PacketError::InvalidRemainingLength)
        } else {
            Ok(None)
        }
    }
}

fn push_slice(frame: &mut Frame, bytes: &[u8]) -> Result<(), PacketError> {
    frame
        .extend_from_slice(bytes)
        .map_err(|_| PacketError::BufferTooSmall)
}

fn push_str(frame: &mut Frame, value: &str) -> Result<(), PacketError> {
    let len = u16::try_from(value.len()).map_err(|_| PacketError::BufferTooSmall)?;
    push_slice(frame, &len.to_be_bytes())?;
    push_slice(frame, value.as_bytes())
}

/// Wraps a variable header + payload with the fixed header.
fn finish(header: u8, body: &[u8]) -> Result<Frame, PacketError> {
    let mut len_bytes = [0u8; 4];
    let n = encode_remaining_length(body.len(), &mut len_bytes)?;

    let mut frame = Frame::new();
    push_slice(&mut frame, &[header])?;
    push_slice(&mut frame, &len_bytes[..n])?;
    push_slice(&mut frame, body)?;
    Ok(frame)
}

/// CONNECT with a clean session and no will, username or password
pub fn connect(client_id: &str, keep_alive_secs: u16) -> Result<Frame, PacketError> {
    let mut body = Frame::new();
    push_str(&mut body, PROTOCOL_NAME)?;
    push_slice(&mut body, &[PROTOCOL_LEVEL, CONNECT_FLAG_CLEAN_SESSION])?;
    push_slice(&mut body, &keep_alive_secs.to_be_bytes())?;
    push_str(&mut body, client_id)?;

    finish((PacketType::Connect as u8) << 4, &body)
}

/// SUBSCRIBE to a single topic filter at QoS 0
pub fn subscribe(packet_id: u16, topic: &str) -> Result<Frame, PacketError> {
    let mut body = Frame::new();
    push_slice(&mut body, &packet_id.to_be_bytes())?;
    push_str(&mut body, topic)?;
    push_slice(&mut body, &[QoS::AtMostOnce as u8])?;

    // SUBSCRIBE has reserved flag bits 0b0010
    finish(((PacketType::Subscribe as u8) << 4) | 0x02, &body)
}

/// PUBACK for a QoS 1 publish
pub fn puback(packet_id: u16) -> Result<Frame, PacketError> {
    finish((PacketType::PubAck as u8) << 4, &packet_id.to_be_bytes())
}

/// Client keep-alive ping
pub fn pingreq() -> Result<Frame, PacketError> {
    finish((PacketType::PingReq as u8) << 4, &[])
}

/// Answer to a broker-initiated ping
pub fn pingresp() -> Result<Frame, PacketError> {
    finish((PacketType::PingResp as u8) << 4, &[])
}

/// Return code carried in a CONNACK body
pub fn parse_connack(body: &[u8]) -> Result<u8, PacketError> {
    match body {
        [_flags, code, ..] => Ok(*code),
        _ => Err(PacketError::Truncated),
    }
}

/// Parses a PUBLISH body. `header` is the fixed-header byte carrying the
/// QoS and retain flags.
pub fn parse_publish(header: u8, body: &[u8]) -> Result<Publish<'_>, PacketError> {
    let qos = match (header >> 1) & 0x03 {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => return Err(PacketError::InvalidQoS),
    };
    let retain = header & 0x01 != 0;

    let [hi, lo, rest @ ..] = body else {
        return Err(PacketError::Truncated);
    };
    let topic_len = usize::from(u16::from_be_bytes([*hi, *lo]));
    if rest.len() < topic_len {
        return Err(PacketError::Truncated);
    }
    let (topic, rest) = rest.split_at(topic_len);
    let topic = core::str::from_utf8(topic).map_err(|_| PacketError::InvalidTopic)?;

    let (packet_id, payload) = match qos {
        QoS::AtMostOnce => (None, rest),
        QoS::AtLeastOnce | QoS::ExactlyOnce => match rest {
            [hi, lo, payload @ ..] => (Some(u16::from_be_bytes([*hi, *lo])), payload),
            _ => return Err(PacketError::Truncated),
        },
    };

    Ok(Publish {
        topic,
        payload,
        qos,
        packet_id,
        retain,
    })
}
