//! Bakes the Wi-Fi credentials and broker address into the firmware.
//!
//! Values come from a `.env` file (searched from this crate upwards) or the
//! build environment. See `.env.example` at the repository root.

use std::env;

const REQUIRED: [&str; 3] = ["WIFI_SSID", "WIFI_PASSWORD", "MQTT_HOST"];
const DEFAULT_MQTT_PORT: &str = "1883";

fn main() {
    if let Ok(path) = dotenvy::dotenv() {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    for key in REQUIRED {
        println!("cargo:rerun-if-env-changed={key}");
        let value = env::var(key)
            .unwrap_or_else(|_| panic!("{key} must be set in .env or the build environment"));
        println!("cargo:rustc-env={key}={value}");
    }

    println!("cargo:rerun-if-env-changed=MQTT_PORT");
    let port = env::var("MQTT_PORT").unwrap_or_else(|_| DEFAULT_MQTT_PORT.into());
    if port.parse::<u16>().is_err() {
        panic!("MQTT_PORT must be a port number, got {port:?}");
    }
    println!("cargo:rustc-env=MQTT_PORT={port}");
}
