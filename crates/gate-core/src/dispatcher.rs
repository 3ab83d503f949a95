//! Topic to gate command dispatch

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use log::info;

use crate::actuator::{ActuatorError, GateActuator, GateLine};
use crate::config::{GATE_CLOSE_TOPIC, GATE_OPEN_TOPIC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Open,
    Close,
}

impl Command {
    /// Every command, in subscription order
    pub const ALL: [Command; 2] = [Command::Open, Command::Close];

    /// Exact, case-sensitive topic match
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            GATE_OPEN_TOPIC => Some(Self::Open),
            GATE_CLOSE_TOPIC => Some(Self::Close),
            _ => None,
        }
    }

    /// Topic this command is subscribed on
    pub const fn topic(self) -> &'static str {
        match self {
            Self::Open => GATE_OPEN_TOPIC,
            Self::Close => GATE_CLOSE_TOPIC,
        }
    }

    /// Output line pulsed for this command
    pub const fn line(self) -> GateLine {
        match self {
            Self::Open => GateLine::Open,
            Self::Close => GateLine::Close,
        }
    }
}

/// Routes inbound messages to the actuator, lighting the indicator while a
/// message is being handled.
pub struct CommandDispatcher<P, I, D> {
    actuator: GateActuator<P, D>,
    indicator: I,
}

impl<P, I, D> CommandDispatcher<P, I, D>
where
    P: OutputPin,
    I: OutputPin,
    D: DelayNs,
{
    /// Create a new dispatcher driving `indicator` around each message
    pub fn new(actuator: GateActuator<P, D>, indicator: I) -> Self {
        Self {
            actuator,
            indicator,
        }
    }

    /// Handles one message. Unknown topics are ignored and yield `Ok(None)`.
    ///
    /// The payload is accepted but not interpreted.
    pub async fn dispatch(
        &mut self,
        topic: &str,
        _payload: &[u8],
    ) -> Result<Option<Command>, ActuatorError> {
        info!("Message arrived on topic: {}", topic);

        self.indicator.set_high().map_err(|_| ActuatorError::Indicator)?;

        let command = Command::from_topic(topic);
        let result = match command {
            Some(command) => self.actuator.pulse(command.line()).await,
            None => Ok(()),
        };

        // Indicator goes back LOW even if the pulse failed
        self.indicator.set_low().map_err(|_| ActuatorError::Indicator)?;
        result.map(|()| command)
    }
}
