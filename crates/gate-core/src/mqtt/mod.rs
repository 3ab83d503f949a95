//! Minimal MQTT 3.1.1 client for the gate command channel
//!
//! Only what the gate needs is implemented: CONNECT with a clean session,
//! QoS 0 SUBSCRIBE, inbound PUBLISH (QoS 0 and 1), and keep-alive pings.
//! The client is transport agnostic; anything implementing [`Transport`]
//! (an `embassy-net` TCP socket on the device, a `std` TCP stream in the
//! simulator) can carry it.

mod client;
pub mod packet;

pub use client::{ClientState, MqttClient};
pub use packet::{PacketError, Publish, QoS};

use embedded_io_async::{Read, ReadReady, Write};
use thiserror_no_std::Error;

/// Byte stream to the broker that can be (re)opened on demand.
pub trait Transport: Read + Write + ReadReady {
    /// Open a fresh connection to the broker.
    fn connect(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Drop the connection. Must be safe to call when already closed.
    fn close(&mut self);

    /// Bound every following read to `timeout_ms`. `None` restores the
    /// transport's own session default.
    fn set_read_timeout(&mut self, timeout_ms: Option<u32>);
}

/// Monotonic millisecond time source used for keep-alive bookkeeping
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Error, Debug)]
pub enum MqttError<E> {
    #[error("transport error: {0:?}")]
    Transport(E),
    #[error("malformed packet: {0}")]
    Packet(PacketError),
    #[error("broker refused connection: {0:?}")]
    Refused(ClientState),
    #[error("unexpected packet type {0:#04x}")]
    UnexpectedPacket(u8),
    #[error("connection closed by broker")]
    ConnectionClosed,
    #[error("not connected")]
    NotConnected,
    #[error("keep-alive timed out")]
    KeepAliveTimeout,
}

impl<E> From<PacketError> for MqttError<E> {
    fn from(err: PacketError) -> Self {
        Self::Packet(err)
    }
}
