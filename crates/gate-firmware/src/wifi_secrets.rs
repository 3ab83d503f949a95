//! Credentials and broker address, injected at build time by `build.rs`.

use gate_core::config::{BrokerConfig, InternetConfig, MQTT_DEFAULT_PORT};

pub const WIFI_SSID: &str = env!("WIFI_SSID");
pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");
pub const MQTT_HOST: &str = env!("MQTT_HOST");
const MQTT_PORT: &str = env!("MQTT_PORT");

pub const fn internet() -> InternetConfig<'static> {
    InternetConfig {
        ssid: WIFI_SSID,
        password: WIFI_PASSWORD,
    }
}

/// Broker settings; the port was validated by the build script.
pub fn broker() -> BrokerConfig<'static> {
    let port = MQTT_PORT.parse().unwrap_or(MQTT_DEFAULT_PORT);
    BrokerConfig::new(MQTT_HOST).with_port(port)
}
