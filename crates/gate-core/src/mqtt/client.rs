use embedded_io_async::{Read, Write};
use log::{debug, warn};

use super::packet::{self, PacketType, Publish, QoS, RemainingLength};
use super::{Clock, MqttError, Transport};
use crate::config::{MQTT_CONNACK_TIMEOUT_MS, MQTT_MAX_PACKET_SIZE};

/// Connection state, numbered the way the broker diagnostics report it
/// (`rc=N` in the logs). Negative values are local failures, positive values
/// are CONNACK refusal codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    ConnectionTimeout,
    ConnectionLost,
    ConnectFailed,
    Disconnected,
    Connected,
    BadProtocol,
    BadClientId,
    Unavailable,
    BadCredentials,
    Unauthorized,
}

impl ClientState {
    pub const fn code(self) -> i8 {
        match self {
            Self::ConnectionTimeout => -4,
            Self::ConnectionLost => -3,
            Self::ConnectFailed => -2,
            Self::Disconnected => -1,
            Self::Connected => 0,
            Self::BadProtocol => 1,
            Self::BadClientId => 2,
            Self::Unavailable => 3,
            Self::BadCredentials => 4,
            Self::Unauthorized => 5,
        }
    }

    /// Maps a non-zero CONNACK return code
    pub const fn from_return_code(code: u8) -> Self {
        match code {
            0 => Self::Connected,
            1 => Self::BadProtocol,
            2 => Self::BadClientId,
            3 => Self::Unavailable,
            4 => Self::BadCredentials,
            5 => Self::Unauthorized,
            _ => Self::ConnectFailed,
        }
    }
}

enum Incoming {
    Packet { header: u8, len: usize },
    Dropped { header: u8, len: usize },
}

/// MQTT client with a fixed `N`-byte receive buffer.
///
/// The client never spawns work of its own: [`MqttClient::poll`] has to be
/// called regularly to service keep-alive and deliver messages.
pub struct MqttClient<'a, T, C, const N: usize = MQTT_MAX_PACKET_SIZE> {
    transport: T,
    clock: C,
    client_id: &'a str,
    keep_alive_secs: u16,
    state: ClientState,
    rx: [u8; N],
    next_packet_id: u16,
    last_in_ms: u64,
    last_out_ms: u64,
    ping_outstanding: bool,
}

impl<'a, T, C, const N: usize> MqttClient<'a, T, C, N>
where
    T: Transport,
    C: Clock,
{
    pub fn new(transport: T, clock: C, client_id: &'a str, keep_alive_secs: u16) -> Self {
        Self {
            transport,
            clock,
            client_id,
            keep_alive_secs,
            state: ClientState::Disconnected,
            rx: [0; N],
            next_packet_id: 0,
            last_in_ms: 0,
            last_out_ms: 0,
            ping_outstanding: false,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// Opens the transport and performs the CONNECT/CONNACK handshake.
    ///
    /// Does nothing when already connected. On failure the transport is closed
    /// and [`MqttClient::state`] says why.
    pub async fn connect(&mut self) -> Result<(), MqttError<T::Error>> {
        if self.is_connected() {
            return Ok(());
        }

        self.transport.close();
        if let Err(err) = self.transport.connect().await {
            self.state = ClientState::ConnectFailed;
            return Err(MqttError::Transport(err));
        }

        self.transport.set_read_timeout(Some(MQTT_CONNACK_TIMEOUT_MS));
        let handshake = self.handshake().await;
        self.transport.set_read_timeout(None);

        match handshake {
            Ok(()) => {
                let now = self.clock.now_ms();
                self.state = ClientState::Connected;
                self.last_in_ms = now;
                self.last_out_ms = now;
                self.ping_outstanding = false;
                Ok(())
            }
            Err(err) => {
                self.transport.close();
                self.state = match &err {
                    MqttError::Refused(state) => *state,
                    MqttError::Transport(_) | MqttError::ConnectionClosed => {
                        ClientState::ConnectionTimeout
                    }
                    _ => ClientState::ConnectFailed,
                };
                Err(err)
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), MqttError<T::Error>> {
        let frame = packet::connect(self.client_id, self.keep_alive_secs)?;
        self.send(&frame).await?;

        match self.read_packet().await? {
            Incoming::Packet { header, len }
                if PacketType::from_header(header) == Some(PacketType::ConnAck) =>
            {
                match packet::parse_connack(&self.rx[..len])? {
                    0 => Ok(()),
                    code => Err(MqttError::Refused(ClientState::from_return_code(code))),
                }
            }
            Incoming::Packet { header, .. } | Incoming::Dropped { header, .. } => {
                Err(MqttError::UnexpectedPacket(header))
            }
        }
    }

    /// Subscribes to `topic` at QoS 0, returning the packet id used.
    ///
    /// The SUBACK is not awaited; it is consumed by a later [`MqttClient::poll`].
    pub async fn subscribe(&mut self, topic: &str) -> Result<u16, MqttError<T::Error>> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }

        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        let packet_id = self.next_packet_id;
        let frame = packet::subscribe(packet_id, topic)?;

        if let Err(err) = self.send(&frame).await {
            self.drop_connection(ClientState::ConnectionLost);
            return Err(err);
        }
        Ok(packet_id)
    }

    /// One non-blocking pass: services keep-alive and, if data is waiting,
    /// reads exactly one packet. Returns the message when that packet was a
    /// PUBLISH.
    ///
    /// Any error drops the connection; the caller reconnects.
    pub async fn poll(&mut self) -> Result<Option<Publish<'_>>, MqttError<T::Error>> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }

        let (header, len) = match self.service().await {
            Ok(Some(publish)) => publish,
            Ok(None) => return Ok(None),
            Err(err) => {
                if self.is_connected() {
                    self.drop_connection(ClientState::ConnectionLost);
                }
                return Err(err);
            }
        };

        Ok(Some(packet::parse_publish(header, &self.rx[..len])?))
    }

    /// Returns the header and body length of a received PUBLISH, left in `rx`.
    async fn service(&mut self) -> Result<Option<(u8, usize)>, MqttError<T::Error>> {
        let now = self.clock.now_ms();
        let keep_alive_ms = u64::from(self.keep_alive_secs) * 1000;

        if now.saturating_sub(self.last_in_ms) > keep_alive_ms
            || now.saturating_sub(self.last_out_ms) > keep_alive_ms
        {
            if self.ping_outstanding {
                warn!("MQTT keep-alive timed out");
                self.drop_connection(ClientState::ConnectionTimeout);
                return Err(MqttError::KeepAliveTimeout);
            }
            self.send(&packet::pingreq()?).await?;
            self.last_in_ms = now;
            self.ping_outstanding = true;
        }

        if !self.transport.read_ready().map_err(MqttError::Transport)? {
            return Ok(None);
        }

        let (header, len) = match self.read_packet().await? {
            Incoming::Packet { header, len } => (header, len),
            Incoming::Dropped { header, len } => {
                warn!("Dropped {} byte packet (type {:#04x}) larger than buffer", len, header);
                self.last_in_ms = self.clock.now_ms();
                return Ok(None);
            }
        };
        self.last_in_ms = self.clock.now_ms();

        match PacketType::from_header(header) {
            Some(PacketType::Publish) => {
                let publish = packet::parse_publish(header, &self.rx[..len])?;
                let ack = match (publish.qos, publish.packet_id) {
                    (QoS::AtLeastOnce, Some(packet_id)) => Some(packet_id),
                    _ => None,
                };
                if let Some(packet_id) = ack {
                    self.send(&packet::puback(packet_id)?).await?;
                }
                return Ok(Some((header, len)));
            }
            Some(PacketType::PingReq) => self.send(&packet::pingresp()?).await?,
            Some(PacketType::PingResp) => self.ping_outstanding = false,
            other => debug!("Ignoring MQTT packet {:?}", other),
        }

        Ok(None)
    }

    fn drop_connection(&mut self, state: ClientState) {
        self.transport.close();
        self.state = state;
        self.ping_outstanding = false;
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), MqttError<T::Error>> {
        write_all(&mut self.transport, frame).await?;
        self.transport.flush().await.map_err(MqttError::Transport)?;
        self.last_out_ms = self.clock.now_ms();
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Incoming, MqttError<T::Error>> {
        let mut byte = [0u8; 1];
        read_exact(&mut self.transport, &mut byte).await?;
        let header = byte[0];

        let mut decoder = RemainingLength::new();
        let len = loop {
            read_exact(&mut self.transport, &mut byte).await?;
            if let Some(len) = decoder.push(byte[0])? {
                break len;
            }
        };

        if len > N {
            let mut scratch = [0u8; 32];
            let mut remaining = len;
            while remaining > 0 {
                let chunk = remaining.min(scratch.len());
                read_exact(&mut self.transport, &mut scratch[..chunk]).await?;
                remaining -= chunk;
            }
            return Ok(Incoming::Dropped { header, len });
        }

        read_exact(&mut self.transport, &mut self.rx[..len]).await?;
        Ok(Incoming::Packet { header, len })
    }
}

async fn read_exact<R: Read>(
    reader: &mut R,
    mut buf: &mut [u8],
) -> Result<(), MqttError<R::Error>> {
    while !buf.is_empty() {
        match reader.read(buf).await.map_err(MqttError::Transport)? {
            0 => return Err(MqttError::ConnectionClosed),
            n => buf = &mut buf[n..],
        }
    }
    Ok(())
}

async fn write_all<W: Write>(
    writer: &mut W,
    mut buf: &[u8],
) -> Result<(), MqttError<W::Error>> {
    while !buf.is_empty() {
        match writer.write(buf).await.map_err(MqttError::Transport)? {
            0 => return Err(MqttError::ConnectionClosed),
            n => buf = &buf[n..],
        }
    }
    Ok(())
}
