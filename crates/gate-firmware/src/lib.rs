//! ESP32 firmware-specific modules for the gate controller
//!
//! This crate contains the hardware-specific glue that cannot compile on
//! desktop targets: GPIO setup, the Wi-Fi connectivity provider, the TCP
//! transport carrying MQTT, the device restart primitive and the build-time
//! credentials.

#![no_std]

pub mod broker;
pub mod hardware;
pub mod network;
pub mod system;
pub mod wifi_secrets;
