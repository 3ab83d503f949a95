//! Output line setup for the gate relays and the status LED
//!
//! GPIO22 drives the "open" relay and GPIO23 the "close" relay. Both are
//! push-pull outputs with no pull resistors, starting HIGH (relays idle).
//! GPIO2 is the on-board LED of the ESP32 DevKit, lit while a command is
//! being handled.

use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::peripherals::{GPIO2, GPIO22, GPIO23};

pub struct GatePins {
    pub open: Output<'static>,
    pub close: Output<'static>,
    pub indicator: Output<'static>,
}

pub fn init_gate_pins(
    open: GPIO22<'static>,
    close: GPIO23<'static>,
    led: GPIO2<'static>,
) -> GatePins {
    GatePins {
        open: Output::new(open, Level::High, OutputConfig::default()),
        close: Output::new(close, Level::High, OutputConfig::default()),
        indicator: Output::new(led, Level::Low, OutputConfig::default()),
    }
}
