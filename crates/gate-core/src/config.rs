//! Compile-time configuration shared by the firmware and the simulator.
//!
//! Credentials and the broker address are not stored here; they are injected
//! by each binary (build-time `.env` for the firmware, runtime environment for
//! the simulator).

/// Topic that triggers the open relay pulse
pub const GATE_OPEN_TOPIC: &str = "ESP32_GATE/OPEN";
/// Topic that triggers the close relay pulse
pub const GATE_CLOSE_TOPIC: &str = "ESP32_GATE/CLOSE";

/// Client identifier presented in the MQTT CONNECT packet
pub const MQTT_CLIENT_ID: &str = "ESP32_Client";
/// Default broker port (plain TCP)
pub const MQTT_DEFAULT_PORT: u16 = 1883;
/// Keep-alive advertised to the broker, in seconds
pub const MQTT_KEEP_ALIVE_SECS: u16 = 15;
/// Longest wait for the broker's CONNACK before the attempt counts as timed out
pub const MQTT_CONNACK_TIMEOUT_MS: u32 = 15_000;
/// Largest inbound packet body the client buffers; bigger packets are dropped
pub const MQTT_MAX_PACKET_SIZE: usize = 256;

/// How long an output line is held LOW to trigger the relay
pub const PULSE_DURATION_MS: u32 = 1500;

/// Idle time between main-loop passes that delivered no message, so the
/// network stack gets to run
pub const IDLE_POLL_MS: u32 = 10;

/// Pause between failed connection attempts
pub const RETRY_INTERVAL_MS: u32 = 500;
/// Consecutive failed attempts after which the device restarts (~30 s)
pub const MAX_RETRY_TRIALS: u32 = 60;

/// Broker endpoint and session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    pub client_id: &'a str,
    pub keep_alive_secs: u16,
}

impl<'a> BrokerConfig<'a> {
    /// Broker at `host` with the default port, client id and keep-alive
    pub const fn new(host: &'a str) -> Self {
        Self {
            host,
            port: MQTT_DEFAULT_PORT,
            client_id: MQTT_CLIENT_ID,
            keep_alive_secs: MQTT_KEEP_ALIVE_SECS,
        }
    }

    /// Same broker on a different port
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Wi-Fi credentials handed to the connectivity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternetConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}
