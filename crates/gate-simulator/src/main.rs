//! Desktop simulator for the MQTT gate controller.
//!
//! Runs the same `GateController` as the firmware, but over a
//! `std::net::TcpStream` to a real broker. The relay lines and the LED are
//! virtual pins that log their level changes, and a device restart ends the
//! process.
//!
//! # Environment
//!
//! | Variable    | Default     |
//! |-------------|-------------|
//! | `MQTT_HOST` | `127.0.0.1` |
//! | `MQTT_PORT` | `1883`      |
//! | `WIFI_SSID` | `simulated` |
//! | `RUST_LOG`  | `info`      |
//!
//! A `.env` file in the working directory is read first.
//!
//! Try it with `mosquitto_pub -t ESP32_GATE/OPEN -m ""`.

use std::convert::Infallible;
use std::io::{self, ErrorKind as IoErrorKind, Read as _, Write as _};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorKind, ErrorType, Read, ReadReady, Write};
use log::{debug, error, info, warn};

use gate_core::config::{BrokerConfig, InternetConfig, MQTT_DEFAULT_PORT};
use gate_core::mqtt::{Clock, MqttClient, Transport};
use gate_core::{
    CommandDispatcher, GateActuator, GateController, Restart, RetrySupervisor, Supervised,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_HOST: &str = "127.0.0.1";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Session read timeout. Longer than the MQTT keep-alive so the ping logic,
/// not the socket, decides when an idle session is dead.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Broker transport
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct HostIoError(io::Error);

impl core::fmt::Display for HostIoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

impl core::error::Error for HostIoError {}

impl embedded_io_async::Error for HostIoError {
    fn kind(&self) -> ErrorKind {
        match self.0.kind() {
            IoErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            IoErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
            IoErrorKind::ConnectionAborted => ErrorKind::ConnectionAborted,
            IoErrorKind::NotConnected => ErrorKind::NotConnected,
            IoErrorKind::TimedOut | IoErrorKind::WouldBlock => ErrorKind::TimedOut,
            IoErrorKind::AddrNotAvailable => ErrorKind::AddrNotAvailable,
            _ => ErrorKind::Other,
        }
    }
}

/// Blocking `TcpStream` behind the async transport traits. Every call
/// completes on first poll, which is fine under `block_on`.
struct HostTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    read_timeout: Duration,
}

impl HostTransport {
    fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            stream: None,
            read_timeout: READ_TIMEOUT,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, HostIoError> {
        self.stream
            .as_mut()
            .ok_or_else(|| HostIoError(io::Error::from(IoErrorKind::NotConnected)))
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::from(IoErrorKind::AddrNotAvailable))
    }
}

impl ErrorType for HostTransport {
    type Error = HostIoError;
}

impl Read for HostTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.stream()?.read(buf).map_err(HostIoError)
    }
}

impl ReadReady for HostTransport {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        let stream = self.stream()?;
        stream.set_nonblocking(true).map_err(HostIoError)?;
        let mut probe = [0u8; 1];
        let ready = match stream.peek(&mut probe) {
            // Zero bytes means EOF; report ready so the next read sees it
            Ok(_) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(HostIoError(e)),
        };
        stream.set_nonblocking(false).map_err(HostIoError)?;
        ready
    }
}

impl Write for HostTransport {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream()?.write(buf).map_err(HostIoError)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream()?.flush().map_err(HostIoError)
    }
}

impl Transport for HostTransport {
    async fn connect(&mut self) -> Result<(), Self::Error> {
        let address = self.resolve().map_err(HostIoError)?;
        debug!("Opening TCP connection to {}", address);

        let stream = TcpStream::connect_timeout(&address, CONNECT_TIMEOUT).map_err(HostIoError)?;
        stream.set_read_timeout(Some(self.read_timeout)).map_err(HostIoError)?;
        stream.set_nodelay(true).map_err(HostIoError)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn set_read_timeout(&mut self, timeout_ms: Option<u32>) {
        self.read_timeout = timeout_ms
            .map(|ms| Duration::from_millis(u64::from(ms)))
            .unwrap_or(READ_TIMEOUT);
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.set_read_timeout(Some(self.read_timeout)) {
                warn!("Could not set socket read timeout: {}", e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Network link
// ---------------------------------------------------------------------------

/// Stands in for the Wi-Fi association: up once the broker host has
/// resolved. The address is looked up by `attempt` and kept afterwards.
struct HostNetwork {
    ssid: String,
    host: String,
    port: u16,
    resolved: Option<SocketAddr>,
}

impl Supervised for HostNetwork {
    async fn attempt(&mut self) {
        match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(mut addresses) => {
                self.resolved = addresses.next();
                if let Some(address) = self.resolved {
                    info!("Connected to {} (simulated). Broker at {}", self.ssid, address);
                }
            }
            Err(e) => debug!("Cannot resolve {}: {}", self.host, e),
        }
    }

    fn is_satisfied(&mut self) -> bool {
        self.resolved.is_some()
    }

    fn on_attempt_failed(&mut self, trial: u32) {
        warn!("Failed to connect to: {} (attempt {})", self.ssid, trial);
    }
}

// ---------------------------------------------------------------------------
// Virtual hardware
// ---------------------------------------------------------------------------

struct LoggedPin {
    name: &'static str,
}

impl PinErrorType for LoggedPin {
    type Error = Infallible;
}

impl OutputPin for LoggedPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        info!("[pin] {} -> LOW", self.name);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        info!("[pin] {} -> HIGH", self.name);
        Ok(())
    }
}

struct StdDelay;

impl DelayNs for StdDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

struct HostClock(Instant);

impl Clock for HostClock {
    fn now_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

struct ProcessRestart;

impl Restart for ProcessRestart {
    fn restart(&mut self) -> ! {
        error!("Device restart requested, exiting");
        std::process::exit(1)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() {
    // A missing .env file is fine; the process environment still applies.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let host = env_or("MQTT_HOST", DEFAULT_HOST);
    let port = match std::env::var("MQTT_PORT") {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid MQTT_PORT {:?}, using {}", raw, MQTT_DEFAULT_PORT);
            MQTT_DEFAULT_PORT
        }),
        Err(_) => MQTT_DEFAULT_PORT,
    };
    let broker = BrokerConfig::new(&host).with_port(port);
    let ssid = env_or("WIFI_SSID", "simulated");
    let internet = InternetConfig {
        ssid: &ssid,
        password: "",
    };

    info!("Connecting to WiFi: {}", internet.ssid);
    info!("MQTT broker: {}:{}", broker.host, broker.port);

    let network = HostNetwork {
        ssid: internet.ssid.to_string(),
        host: broker.host.to_string(),
        port: broker.port,
        resolved: None,
    };
    let transport = HostTransport::new(broker.host.to_string(), broker.port);
    let client: MqttClient<'_, HostTransport, HostClock> = MqttClient::new(
        transport,
        HostClock(Instant::now()),
        broker.client_id,
        broker.keep_alive_secs,
    );

    let actuator = match GateActuator::new(
        LoggedPin { name: "open (GPIO22)" },
        LoggedPin { name: "close (GPIO23)" },
        StdDelay,
    ) {
        Ok(actuator) => actuator,
        Err(e) => {
            error!("Failed to initialise gate lines: {}", e);
            std::process::exit(1);
        }
    };
    let dispatcher = CommandDispatcher::new(actuator, LoggedPin { name: "led (GPIO2)" });

    let mut controller = GateController::new(
        RetrySupervisor::new(StdDelay, ProcessRestart),
        network,
        client,
        dispatcher,
    );

    embassy_futures::block_on(controller.run());
}
