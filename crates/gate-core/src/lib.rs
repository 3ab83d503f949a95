//! Hardware-independent core library for the MQTT gate controller
//!
//! This crate contains all platform-agnostic logic for the gate device: the
//! bounded retry supervisor that keeps the network and broker links alive,
//! the timed relay pulse driver, topic-to-command dispatch, the main loop, and
//! a small MQTT 3.1.1 client.
//!
//! It is `#![no_std]` so it compiles on the ESP32 target as well as on desktop
//! hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

pub mod actuator;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod mqtt;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use actuator::{ActuatorError, GateActuator, GateLine};
pub use controller::{BrokerLink, GateController, Pass};
pub use dispatcher::{Command, CommandDispatcher};
pub use supervisor::{Restart, RetryPolicy, RetrySupervisor, Supervised};
