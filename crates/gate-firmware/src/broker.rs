//! TCP transport to the MQTT broker over `embassy-net`
//!
//! The broker host may be a dotted IPv4 address or a name resolved through
//! the DHCP-provided DNS server. One socket is reused for the lifetime of the
//! device; closing aborts the connection so the next connect starts clean.

use core::net::Ipv4Addr;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, Error as TcpError, TcpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, with_timeout};
use embedded_io_async::{ErrorKind, ErrorType, Read, ReadReady, Write};
use gate_core::mqtt::Transport;
use log::debug;

/// Must exceed the MQTT keep-alive so an idle session is closed by the ping
/// logic and not by TCP.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the TCP handshake so one unreachable broker costs a few seconds
/// of the retry budget, not a full socket timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub enum SocketError {
    Dns,
    NoAddress,
    Connect(ConnectError),
    Tcp(TcpError),
    TimedOut,
}

impl core::fmt::Display for SocketError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Dns => write!(f, "DNS lookup failed"),
            Self::NoAddress => write!(f, "host resolved to no address"),
            Self::Connect(e) => write!(f, "TCP connect failed: {:?}", e),
            Self::Tcp(e) => write!(f, "TCP error: {:?}", e),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

// `embedded_io` errors must also be `core::error::Error`
impl core::error::Error for SocketError {}

impl embedded_io_async::Error for SocketError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Dns | Self::NoAddress => ErrorKind::AddrNotAvailable,
            Self::Connect(_) => ErrorKind::ConnectionRefused,
            Self::Tcp(_) => ErrorKind::ConnectionReset,
            Self::TimedOut => ErrorKind::TimedOut,
        }
    }
}

pub struct BrokerSocket {
    socket: TcpSocket<'static>,
    stack: Stack<'static>,
    host: &'static str,
    port: u16,
    read_timeout: Option<Duration>,
}

impl BrokerSocket {
    pub fn new(
        socket: TcpSocket<'static>,
        stack: Stack<'static>,
        host: &'static str,
        port: u16,
    ) -> Self {
        Self {
            socket,
            stack,
            host,
            port,
            read_timeout: None,
        }
    }

    async fn resolve(&self) -> Result<IpAddress, SocketError> {
        if let Ok(address) = self.host.parse::<Ipv4Addr>() {
            return Ok(IpAddress::Ipv4(address));
        }

        let addresses = self
            .stack
            .dns_query(self.host, DnsQueryType::A)
            .await
            .map_err(|_| SocketError::Dns)?;
        addresses.first().copied().ok_or(SocketError::NoAddress)
    }
}

impl ErrorType for BrokerSocket {
    type Error = SocketError;
}

impl Read for BrokerSocket {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let read = match self.read_timeout {
            Some(timeout) => with_timeout(timeout, self.socket.read(buf))
                .await
                .map_err(|_| SocketError::TimedOut)?,
            None => self.socket.read(buf).await,
        };
        read.map_err(SocketError::Tcp)
    }
}

impl ReadReady for BrokerSocket {
    /// Also true once the peer has closed, so the next read reports EOF.
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.socket.can_recv() || !self.socket.may_recv())
    }
}

impl Write for BrokerSocket {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket.write(buf).await.map_err(SocketError::Tcp)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.flush().await.map_err(SocketError::Tcp)
    }
}

impl Transport for BrokerSocket {
    async fn connect(&mut self) -> Result<(), Self::Error> {
        let address = self.resolve().await?;
        debug!("Opening TCP connection to {}:{}", address, self.port);

        self.socket.set_timeout(Some(SOCKET_TIMEOUT));
        match with_timeout(CONNECT_TIMEOUT, self.socket.connect((address, self.port))).await {
            Ok(connected) => connected.map_err(SocketError::Connect),
            Err(_) => {
                self.socket.abort();
                Err(SocketError::TimedOut)
            }
        }
    }

    fn close(&mut self) {
        self.socket.abort();
    }

    fn set_read_timeout(&mut self, timeout_ms: Option<u32>) {
        self.read_timeout = timeout_ms.map(|ms| Duration::from_millis(u64::from(ms)));
    }
}
